//! Migrate command implementation

use anyhow::Result;

use crate::manager::{MigrateOptions, MigrateOutcome, SchemaManager};
use crate::version::Version;

pub fn run(
    manager: &mut SchemaManager<'_>,
    version: Option<Version>,
    dry_run: bool,
    keep_tables: bool,
) -> Result<()> {
    let options = MigrateOptions {
        dry_run,
        keep_tables,
    };

    let outcome = manager.migrate(version, &options)?;
    let suffix = if dry_run { " (dry run, rolled back)" } else { "" };

    match outcome {
        MigrateOutcome::Initialised { version } => {
            println!("Database initialised at version {}{}", version, suffix);
        }
        MigrateOutcome::Replayed {
            direction,
            versions,
        } => {
            let list: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
            println!(
                "Replayed {} {} migration(s): {}{}",
                versions.len(),
                direction,
                list.join(", "),
                suffix
            );
        }
        MigrateOutcome::UpToDate(version) => {
            println!("Database is up to date at version {}", version);
        }
    }

    Ok(())
}
