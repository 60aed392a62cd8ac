//! Delete-everything command implementation

use anyhow::{bail, Result};

use crate::manager::SchemaManager;

pub fn run(manager: &mut SchemaManager<'_>, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to drop every table and view without --yes");
    }

    let dropped = manager.delete_everything()?;
    println!("Dropped {} objects", dropped.len());
    for name in &dropped {
        println!("  {}", name);
    }
    Ok(())
}
