//! Rollback command implementation

use anyhow::Result;

use crate::manager::SchemaManager;
use crate::version::Version;

pub fn run(manager: &mut SchemaManager<'_>, version: Version, dry_run: bool) -> Result<()> {
    if !manager.rollback(version, dry_run)? {
        println!("Version {} has not been applied, nothing to roll back", version);
    } else if dry_run {
        println!("Rolled back version {} (dry run, rolled back)", version);
    } else {
        println!("Rolled back version {}", version);
    }
    Ok(())
}
