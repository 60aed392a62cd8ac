//! Replay command implementation

use anyhow::Result;

use crate::manager::SchemaManager;
use crate::version::Version;

pub fn run(manager: &mut SchemaManager<'_>, version: Version, dry_run: bool) -> Result<()> {
    manager.replay(version, dry_run)?;

    if dry_run {
        println!("Replayed version {} (dry run, rolled back)", version);
    } else {
        println!("Replayed version {}", version);
    }
    Ok(())
}
