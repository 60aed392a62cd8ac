//! Checkpoint command implementation

use anyhow::Result;

use crate::manager::SchemaManager;

pub fn run(manager: &mut SchemaManager<'_>, comment: Option<String>) -> Result<()> {
    let version = manager.checkpoint(comment.as_deref())?;
    println!("Migration history collapsed into version {}", version);
    Ok(())
}
