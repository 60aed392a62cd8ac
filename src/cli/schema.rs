//! Schema command implementation

use anyhow::Result;

use crate::manager::SchemaManager;
use crate::version::Version;

pub fn run(manager: &SchemaManager<'_>, at: Option<Version>) -> Result<()> {
    match manager.schema_at(at)? {
        Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        None => println!("No migration files found."),
    }
    Ok(())
}
