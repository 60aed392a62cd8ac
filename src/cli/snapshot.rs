//! Snapshot command implementation

use anyhow::Result;

use crate::manager::{SchemaManager, SnapshotOptions, SnapshotOutcome};
use crate::schema::{QualifiedName, TableRename};
use crate::version::Version;

/// Parse a `from=to` rename argument
pub fn parse_rename(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((from, to)) if !from.trim().is_empty() && !to.trim().is_empty() => {
            Ok((from.trim().to_string(), to.trim().to_string()))
        }
        _ => Err(format!("expected FROM=TO, got '{}'", arg)),
    }
}

pub fn run(
    manager: &mut SchemaManager<'_>,
    comment: Option<String>,
    dry_run: bool,
    renames: Vec<(String, String)>,
    version: Option<Version>,
) -> Result<()> {
    let default_schema = manager.default_schema().to_string();
    let renames = renames
        .iter()
        .map(|(from, to)| -> crate::error::Result<TableRename> {
            Ok(TableRename {
                from: QualifiedName::parse_with_default(from, &default_schema)?,
                to: QualifiedName::parse_with_default(to, &default_schema)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let options = SnapshotOptions {
        comment,
        dry_run,
        renames,
        version,
    };

    match manager.snapshot(&options)? {
        SnapshotOutcome::Written { version, path } => {
            println!("Snapshot {} written to {}", version, path.display());
        }
        SnapshotOutcome::Unchanged => {
            println!("No changes detected.");
        }
        SnapshotOutcome::Aborted(reason) => {
            anyhow::bail!("Snapshot aborted: {}", reason);
        }
        SnapshotOutcome::DryRun(script) => {
            println!("{}", serde_json::to_string_pretty(&script)?);
        }
    }

    Ok(())
}
