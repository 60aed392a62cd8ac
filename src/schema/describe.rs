//! Live schema describer

use tracing::debug;

use super::{QualifiedName, SchemaDef};
use crate::driver::SchemaDriver;
use crate::error::Result;

/// Read every table and its explicit indexes, skipping `ignore`
pub fn describe(driver: &dyn SchemaDriver, ignore: &[QualifiedName]) -> Result<SchemaDef> {
    let mut schema = SchemaDef::default();

    for table in driver.list_tables()? {
        if ignore.contains(&table) {
            debug!(table = %table, "not describing ignored table");
            continue;
        }
        let columns = driver.describe_table(&table)?;
        let indexes = driver.list_indexes(&table)?;
        debug!(table = %table, columns = columns.len(), indexes = indexes.len(), "described table");

        if !indexes.is_empty() {
            schema.indexes.insert(table.clone(), indexes);
        }
        schema.tables.insert(table, columns);
    }

    Ok(schema)
}
