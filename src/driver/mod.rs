//! Database driver trait and connection registry
//!
//! The schema engine never talks SQL directly. Everything it needs from a
//! database goes through [`SchemaDriver`]: catalog reads, DDL, transactions
//! and the rows of the version ledger.
//!
//! Drivers:
//! - SQLite: `SqliteDriver` (rusqlite)

mod sqlite;

pub use sqlite::SqliteDriver;

use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::schema::{ColumnDescriptor, IndexDescriptor, QualifiedName};
use crate::version::Version;

/// Database operations used by the describer, the player and the ledger
pub trait SchemaDriver {
    /// Driver name, for log output
    fn name(&self) -> &str;

    /// Schema that unqualified table names belong to
    fn default_schema(&self) -> &str;

    /// Cheap round trip proving the connection works; returns the server time
    fn probe(&self) -> Result<String>;

    fn list_tables(&self) -> Result<Vec<QualifiedName>>;

    fn list_views(&self) -> Result<Vec<QualifiedName>>;

    fn table_exists(&self, table: &QualifiedName) -> Result<bool>;

    /// Columns ordered by ordinal position
    fn describe_table(&self, table: &QualifiedName) -> Result<Vec<ColumnDescriptor>>;

    /// Explicitly created indexes (not the automatic primary key/unique ones)
    fn list_indexes(&self, table: &QualifiedName) -> Result<Vec<IndexDescriptor>>;

    fn create_table(&self, table: &QualifiedName, columns: &[ColumnDescriptor]) -> Result<()>;

    fn drop_table(&self, table: &QualifiedName) -> Result<()>;

    fn drop_view(&self, view: &QualifiedName) -> Result<()>;

    fn add_column(&self, table: &QualifiedName, column: &ColumnDescriptor) -> Result<()>;

    /// Replace the definition of the column named `column.name`
    fn alter_column(&self, table: &QualifiedName, column: &ColumnDescriptor) -> Result<()>;

    fn drop_column(&self, table: &QualifiedName, column: &str) -> Result<()>;

    fn rename_table(&self, from: &QualifiedName, to: &QualifiedName) -> Result<()>;

    fn create_index(&self, table: &QualifiedName, index: &IndexDescriptor) -> Result<()>;

    fn drop_index(&self, table: &QualifiedName, name: &str) -> Result<()>;

    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    /// Versions recorded in the ledger table, ascending
    fn ledger_versions(&self, ledger: &QualifiedName) -> Result<Vec<Version>>;

    fn insert_ledger_version(&self, ledger: &QualifiedName, version: Version) -> Result<()>;

    fn delete_ledger_version(&self, ledger: &QualifiedName, version: Version) -> Result<()>;

    fn clear_ledger(&self, ledger: &QualifiedName) -> Result<()>;
}

/// Open connections keyed by a hash of their parameters
///
/// Identical parameters share one connection; different parameters get
/// their own. The registry is an ordinary value owned by the caller.
pub struct ConnectionRegistry {
    connections: HashMap<String, SqliteDriver>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Hash of the connection parameters
    pub fn key(config: &DatabaseConfig) -> Result<String> {
        let encoded = serde_json::to_vec(config)?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }

    pub fn get_or_open(&mut self, config: &DatabaseConfig) -> Result<&SqliteDriver> {
        match self.connections.entry(Self::key(config)?) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                tracing::debug!(path = %config.path, "opening database connection");
                let driver = SqliteDriver::open(config)?;
                Ok(entry.insert(driver))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_registry_reuses_identical_parameters() {
        let dir = tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("app.sqlite").to_string_lossy().to_string(),
            ..DatabaseConfig::default()
        };
        let other = DatabaseConfig {
            path: dir.path().join("other.sqlite").to_string_lossy().to_string(),
            ..DatabaseConfig::default()
        };

        let mut registry = ConnectionRegistry::new();
        let first = registry.get_or_open(&config).unwrap() as *const SqliteDriver;
        let second = registry.get_or_open(&config).unwrap() as *const SqliteDriver;
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);

        registry.get_or_open(&other).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_key_depends_on_parameters() {
        let a = DatabaseConfig {
            path: "a.sqlite".to_string(),
            ..DatabaseConfig::default()
        };
        let b = DatabaseConfig {
            path: "b.sqlite".to_string(),
            ..DatabaseConfig::default()
        };
        assert_eq!(
            ConnectionRegistry::key(&a).unwrap(),
            ConnectionRegistry::key(&a).unwrap()
        );
        assert_ne!(
            ConnectionRegistry::key(&a).unwrap(),
            ConnectionRegistry::key(&b).unwrap()
        );
    }
}
