//! Status command implementation

use anyhow::Result;

use crate::manager::SchemaManager;
use crate::version::Version;

fn show(version: Option<Version>) -> String {
    version
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn run(manager: &SchemaManager<'_>) -> Result<()> {
    let status = manager.status()?;

    println!("Current version:  {}", show(status.current));
    println!("Latest version:   {}", show(status.latest));
    println!("Snapshot version: {}", show(status.snapshot));

    if status.migrations.is_empty() {
        println!("\nNo migration files found. Run 'schemata snapshot' first.");
        return Ok(());
    }

    println!("\n{:<16} {:<8} {}", "Version", "Applied", "Comment");
    println!("{}", "-".repeat(60));
    for migration in &status.migrations {
        println!(
            "{:<16} {:<8} {}",
            migration.version.to_string(),
            if migration.applied { "yes" } else { "no" },
            migration.comment.replace('_', " "),
        );
    }

    if !status.missing.is_empty() {
        let missing: Vec<String> = status.missing.iter().map(|v| v.to_string()).collect();
        println!("\nWarning: versions never applied: {}", missing.join(", "));
    }
    if !status.is_latest() {
        println!("\nDatabase is not at the latest version. Run 'schemata migrate'.");
    }
    Ok(())
}
