//! Version ledger: the table of applied migration versions

use tracing::debug;

use crate::driver::SchemaDriver;
use crate::error::Result;
use crate::schema::{ColumnDescriptor, DataType, QualifiedName};
use crate::version::Version;

pub struct Ledger<'a> {
    driver: &'a dyn SchemaDriver,
    table: QualifiedName,
}

impl<'a> Ledger<'a> {
    pub fn new(driver: &'a dyn SchemaDriver, table: QualifiedName) -> Self {
        Self { driver, table }
    }

    pub fn table(&self) -> &QualifiedName {
        &self.table
    }

    /// Create the ledger table if missing; returns whether it was created
    pub fn create_info_table(&self) -> Result<bool> {
        if self.driver.table_exists(&self.table)? {
            return Ok(false);
        }
        debug!(table = %self.table, "creating version ledger");
        let version = ColumnDescriptor::new("version", DataType::BigInt)
            .not_null()
            .primary_key();
        self.driver.create_table(&self.table, &[version])?;
        Ok(true)
    }

    pub fn current_version(&self) -> Result<Option<Version>> {
        Ok(self.applied_versions()?.last().copied())
    }

    pub fn applied_versions(&self) -> Result<Vec<Version>> {
        self.driver.ledger_versions(&self.table)
    }

    pub fn is_applied(&self, version: Version) -> Result<bool> {
        Ok(self.applied_versions()?.contains(&version))
    }

    pub fn record(&self, version: Version) -> Result<()> {
        self.driver.insert_ledger_version(&self.table, version)
    }

    pub fn forget(&self, version: Version) -> Result<()> {
        self.driver.delete_ledger_version(&self.table, version)
    }

    pub fn clear(&self) -> Result<()> {
        self.driver.clear_ledger(&self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SqliteDriver;

    #[test]
    fn test_ledger_lifecycle() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let ledger = Ledger::new(&driver, QualifiedName::new("main", "schema_info"));

        assert_eq!(ledger.current_version().unwrap(), None);
        assert!(ledger.create_info_table().unwrap());
        assert!(!ledger.create_info_table().unwrap());

        ledger.record(Version::new(20240101000000)).unwrap();
        ledger.record(Version::new(20240201000000)).unwrap();
        assert_eq!(
            ledger.current_version().unwrap(),
            Some(Version::new(20240201000000))
        );
        assert!(ledger.is_applied(Version::new(20240101000000)).unwrap());

        ledger.forget(Version::new(20240201000000)).unwrap();
        assert_eq!(
            ledger.applied_versions().unwrap(),
            vec![Version::new(20240101000000)]
        );

        ledger.clear().unwrap();
        assert_eq!(ledger.current_version().unwrap(), None);
    }

    #[test]
    fn test_ledger_column_definition() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let table = QualifiedName::new("main", "schema_info");
        Ledger::new(&driver, table.clone()).create_info_table().unwrap();

        let columns = driver.describe_table(&table).unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].data_type, DataType::BigInt);
        assert!(columns[0].not_null);
        assert!(columns[0].primarykey);
    }
}
