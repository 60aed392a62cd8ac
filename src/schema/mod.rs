//! Typed schema model
//!
//! A schema is a set of tables (ordered column descriptors) plus the
//! explicitly created indexes of each table. Snapshots of a schema are
//! stored as `schema.json` next to the migration files:
//!
//! ```json
//! {
//!   "version": "20240101000000",
//!   "tables": { "main.users": [ { "name": "id", "data_type": "INTEGER", ... } ] },
//!   "indexes": { "main.users": [ { "name": "idx_users_email", "columns": ["email"], "unique": true } ] }
//! }
//! ```

mod changeset;
mod describe;
mod diff;

pub use changeset::{
    AlterOps, ChangeSet, CreateOps, IndexDef, IndexRef, MigrationScript, Operation, RemoveOps,
    RenameOps, TableAlteration, TableDef, TableRename,
};
pub use describe::describe;
pub use diff::{diff_columns, diff_schemas, ColumnDiff, INITIAL_DOWN_MESSAGE};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{MigrateError, Result};
use crate::version::Version;

/// Fully qualified table name, written `schema.table`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `schema.table`, or a bare `table` placed in `default_schema`
    pub fn parse_with_default(s: &str, default_schema: &str) -> Result<Self> {
        match s.split_once('.') {
            Some(_) => s.parse(),
            None if !s.trim().is_empty() => Ok(Self::new(default_schema, s.trim())),
            None => Err(MigrateError::InvalidName(s.to_string())),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

impl FromStr for QualifiedName {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => {
                Ok(Self::new(schema, name))
            }
            _ => Err(MigrateError::InvalidName(s.to_string())),
        }
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = MigrateError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<QualifiedName> for String {
    fn from(name: QualifiedName) -> Self {
        name.to_string()
    }
}

/// Declared column type
///
/// Well-known types are normalized so that a description read back from the
/// database compares equal to the one it was created from. Anything else is
/// kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Integer,
    BigInt,
    Real,
    Text,
    Blob,
    Numeric,
    Boolean,
    Timestamp,
    Other(String),
}

impl DataType {
    pub fn parse(declared: &str) -> Self {
        match declared.trim().to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" => DataType::Integer,
            "INT8" | "BIGINT" => DataType::BigInt,
            "REAL" | "DOUBLE" | "FLOAT" => DataType::Real,
            "TEXT" => DataType::Text,
            "BLOB" => DataType::Blob,
            "NUMERIC" => DataType::Numeric,
            "BOOLEAN" | "BOOL" => DataType::Boolean,
            "DATETIME" | "TIMESTAMP" => DataType::Timestamp,
            _ => DataType::Other(declared.trim().to_string()),
        }
    }

    pub fn as_sql(&self) -> &str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::BigInt => "INT8",
            DataType::Real => "REAL",
            DataType::Text => "TEXT",
            DataType::Blob => "BLOB",
            DataType::Numeric => "NUMERIC",
            DataType::Boolean => "BOOLEAN",
            DataType::Timestamp => "DATETIME",
            DataType::Other(declared) => declared,
        }
    }
}

impl From<String> for DataType {
    fn from(s: String) -> Self {
        DataType::parse(&s)
    }
}

impl From<DataType> for String {
    fn from(t: DataType) -> Self {
        t.as_sql().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Single-column foreign key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referenced table, in the same schema as the referencing table
    pub table: String,
    /// Referenced column; the parent's primary key when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
}

impl ForeignKey {
    pub fn new(table: impl Into<String>, column: Option<&str>) -> Self {
        Self {
            table: table.into(),
            column: column.map(str::to_string),
            on_update: None,
            on_delete: None,
        }
    }

    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        self.on_delete = Some(action.into());
        self
    }
}

/// One column of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub primarykey: bool,
    /// Single-column UNIQUE constraint
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKey>,
    /// Default value as an SQL expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordinal_position: Option<u32>,
    /// Driver metadata carried along untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            not_null: false,
            primarykey: false,
            unique: false,
            references: None,
            default: None,
            ordinal_position: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primarykey = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn references(mut self, key: ForeignKey) -> Self {
        self.references = Some(key);
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Carries a primary key, unique or foreign key constraint
    pub fn is_constrained(&self) -> bool {
        self.primarykey || self.unique || self.references.is_some()
    }

    /// Compare the structural definition, ignoring position and driver metadata
    pub fn same_definition(&self, other: &ColumnDescriptor) -> bool {
        self.name == other.name
            && self.data_type == other.data_type
            && self.not_null == other.not_null
            && self.primarykey == other.primarykey
            && self.unique == other.unique
            && self.references == other.references
            && self.default == other.default
    }
}

/// Compare two column lists by definition, ignoring column order
pub fn same_columns(a: &[ColumnDescriptor], b: &[ColumnDescriptor]) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|col| b.iter().any(|other| col.same_definition(other)))
}

/// An explicitly created index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// Tables and indexes of a database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDef {
    #[serde(default)]
    pub tables: BTreeMap<QualifiedName, Vec<ColumnDescriptor>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub indexes: BTreeMap<QualifiedName, Vec<IndexDescriptor>>,
}

impl SchemaDef {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.indexes.is_empty()
    }

    pub fn columns(&self, table: &QualifiedName) -> Option<&[ColumnDescriptor]> {
        self.tables.get(table).map(|cols| cols.as_slice())
    }

    /// Structural equality: same tables with the same column definitions and
    /// the same indexes, ignoring column order and ordinal positions
    pub fn same_structure(&self, other: &SchemaDef) -> bool {
        let tables_match = self.tables.len() == other.tables.len()
            && self.tables.iter().all(|(name, cols)| {
                other
                    .tables
                    .get(name)
                    .is_some_and(|theirs| same_columns(cols, theirs))
            });
        let non_empty = |m: &BTreeMap<QualifiedName, Vec<IndexDescriptor>>| {
            m.iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| {
                    let mut v = v.clone();
                    v.sort_by(|a, b| a.name.cmp(&b.name));
                    (k.clone(), v)
                })
                .collect::<BTreeMap<_, _>>()
        };
        tables_match && non_empty(&self.indexes) == non_empty(&other.indexes)
    }

    /// Renumber ordinal positions after columns were added or removed
    pub(crate) fn renumber(columns: &mut [ColumnDescriptor]) {
        for (i, col) in columns.iter_mut().enumerate() {
            col.ordinal_position = Some(i as u32 + 1);
        }
    }
}

/// A versioned capture of a schema, persisted as `schema.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub version: Version,
    #[serde(flatten)]
    pub schema: SchemaDef,
}

impl SchemaSnapshot {
    pub fn new(version: Version, schema: SchemaDef) -> Self {
        Self { version, schema }
    }

    /// Load the snapshot file, `Ok(None)` when it does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        let snapshot = serde_json::from_str(&content)?;
        Ok(Some(snapshot))
    }

    /// Save atomically (write to .tmp, then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.write_all(b"\n")?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }

        if let Err(err) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(())
    }
}
