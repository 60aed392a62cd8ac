//! Up/down change sets
//!
//! A change set is a tree keyed by action, then entity type:
//!
//! ```json
//! {
//!   "create": { "table": [ { "name": "main.posts", "cols": [ ... ] } ],
//!               "index": [ { "table": "main.posts", "name": "idx_posts_slug", "columns": ["slug"], "unique": true } ] },
//!   "alter":  { "table": { "main.users": { "add": { "age": { ... } }, "alter": { ... }, "drop": ["nick"] } } },
//!   "remove": { "table": ["main.legacy"], "index": [ { "table": "main.users", "name": "idx_old" } ] },
//!   "rename": { "table": [ { "from": "main.people", "to": "main.persons" } ] },
//!   "raise":  "Can not revert initial snapshot"
//! }
//! ```
//!
//! Parsing is strict: an action/entity pair without a handler fails the whole
//! file before anything is replayed.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::{ColumnDescriptor, IndexDescriptor, QualifiedName, SchemaDef};
use crate::error::{MigrateError, Result};

/// A table to create, with its full column list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: QualifiedName,
    pub cols: Vec<ColumnDescriptor>,
}

/// An index to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub table: QualifiedName,
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    pub fn new(table: &QualifiedName, index: &IndexDescriptor) -> Self {
        Self {
            table: table.clone(),
            name: index.name.clone(),
            columns: index.columns.clone(),
            unique: index.unique,
        }
    }

    pub fn descriptor(&self) -> IndexDescriptor {
        IndexDescriptor {
            name: self.name.clone(),
            columns: self.columns.clone(),
            unique: self.unique,
        }
    }
}

/// An index to remove
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRef {
    pub table: QualifiedName,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRename {
    pub from: QualifiedName,
    pub to: QualifiedName,
}

impl TableRename {
    pub fn inverse(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }
}

/// Column changes of one table; `alter` carries complete new descriptors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableAlteration {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub add: IndexMap<String, ColumnDescriptor>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub alter: IndexMap<String, ColumnDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop: Vec<String>,
}

impl TableAlteration {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.alter.is_empty() && self.drop.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateOps {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub table: Vec<TableDef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub index: Vec<IndexDef>,
}

impl CreateOps {
    pub fn is_empty(&self) -> bool {
        self.table.is_empty() && self.index.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemoveOps {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub table: Vec<QualifiedName>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub index: Vec<IndexRef>,
}

impl RemoveOps {
    pub fn is_empty(&self) -> bool {
        self.table.is_empty() && self.index.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlterOps {
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub table: IndexMap<QualifiedName, TableAlteration>,
}

impl AlterOps {
    pub fn is_empty(&self) -> bool {
        self.table.values().all(TableAlteration::is_empty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenameOps {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub table: Vec<TableRename>,
}

impl RenameOps {
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// One direction of a migration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    #[serde(skip_serializing_if = "CreateOps::is_empty")]
    pub create: CreateOps,
    #[serde(skip_serializing_if = "AlterOps::is_empty")]
    pub alter: AlterOps,
    #[serde(skip_serializing_if = "RemoveOps::is_empty")]
    pub remove: RemoveOps,
    #[serde(skip_serializing_if = "RenameOps::is_empty")]
    pub rename: RenameOps,
    /// Replaying this change set must fail with this message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raise: Option<String>,
}

/// A single DDL step, in replay order
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    DropIndex {
        table: QualifiedName,
        name: String,
    },
    RenameTable {
        from: QualifiedName,
        to: QualifiedName,
    },
    CreateTable {
        table: QualifiedName,
        columns: Vec<ColumnDescriptor>,
    },
    AddColumn {
        table: QualifiedName,
        column: ColumnDescriptor,
    },
    AlterColumn {
        table: QualifiedName,
        column: ColumnDescriptor,
    },
    DropColumn {
        table: QualifiedName,
        column: String,
    },
    DropTable(QualifiedName),
    CreateIndex {
        table: QualifiedName,
        index: IndexDescriptor,
    },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::DropIndex { table, name } => write!(f, "remove index {} on {}", name, table),
            Operation::RenameTable { from, to } => write!(f, "rename table {} to {}", from, to),
            Operation::CreateTable { table, .. } => write!(f, "create table {}", table),
            Operation::AddColumn { table, column } => {
                write!(f, "add column {}.{}", table, column.name)
            }
            Operation::AlterColumn { table, column } => {
                write!(f, "alter column {}.{}", table, column.name)
            }
            Operation::DropColumn { table, column } => {
                write!(f, "drop column {}.{}", table, column)
            }
            Operation::DropTable(table) => write!(f, "remove table {}", table),
            Operation::CreateIndex { table, index } => {
                write!(f, "create index {} on {}", index.name, table)
            }
        }
    }
}

type Handler = fn(&mut ChangeSet, Value, &str) -> Result<()>;

/// Every action/entity pair a migration file may contain
const HANDLERS: &[(&str, &str, Handler)] = &[
    ("create", "table", create_table),
    ("create", "index", create_index),
    ("remove", "table", remove_table),
    ("remove", "index", remove_index),
    ("alter", "table", alter_table),
    ("rename", "table", rename_table),
];

fn create_table(changes: &mut ChangeSet, body: Value, source: &str) -> Result<()> {
    let tables: Vec<TableDef> = decode(body, source, "create.table")?;
    changes.create.table.extend(tables);
    Ok(())
}

fn create_index(changes: &mut ChangeSet, body: Value, source: &str) -> Result<()> {
    let indexes: Vec<IndexDef> = decode(body, source, "create.index")?;
    changes.create.index.extend(indexes);
    Ok(())
}

fn remove_table(changes: &mut ChangeSet, body: Value, source: &str) -> Result<()> {
    let tables: Vec<QualifiedName> = decode(body, source, "remove.table")?;
    changes.remove.table.extend(tables);
    Ok(())
}

fn remove_index(changes: &mut ChangeSet, body: Value, source: &str) -> Result<()> {
    let indexes: Vec<IndexRef> = decode(body, source, "remove.index")?;
    changes.remove.index.extend(indexes);
    Ok(())
}

fn alter_table(changes: &mut ChangeSet, body: Value, source: &str) -> Result<()> {
    let tables: IndexMap<QualifiedName, TableAlteration> = decode(body, source, "alter.table")?;
    changes.alter.table.extend(tables);
    Ok(())
}

fn rename_table(changes: &mut ChangeSet, body: Value, source: &str) -> Result<()> {
    let renames: Vec<TableRename> = decode(body, source, "rename.table")?;
    changes.rename.table.extend(renames);
    Ok(())
}

fn decode<T: DeserializeOwned>(body: Value, source: &str, path: &str) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| MigrateError::malformed(source, format!("{}: {}", path, e)))
}

impl ChangeSet {
    /// Parse a change set, rejecting any action/entity pair without a handler
    pub fn from_value(value: &Value, source: &str) -> Result<Self> {
        let actions = value
            .as_object()
            .ok_or_else(|| MigrateError::malformed(source, "change set must be an object"))?;

        let mut changes = ChangeSet::default();
        for (action, entities) in actions {
            if action == "raise" {
                let message = entities
                    .as_str()
                    .ok_or_else(|| MigrateError::malformed(source, "'raise' must be a string"))?;
                changes.raise = Some(message.to_string());
                continue;
            }

            let entities = entities.as_object().ok_or_else(|| {
                MigrateError::malformed(
                    source,
                    format!("'{}' must map entity types to operations", action),
                )
            })?;
            for (entity, body) in entities {
                let handler = HANDLERS
                    .iter()
                    .find(|(a, e, _)| a == action && e == entity)
                    .map(|(_, _, handler)| handler)
                    .ok_or_else(|| MigrateError::UnsupportedOperation {
                        action: action.clone(),
                        entity: entity.clone(),
                    })?;
                handler(&mut changes, body.clone(), source)?;
            }
        }
        Ok(changes)
    }

    /// Create every table, then every index, of a schema
    pub fn creating(schema: &SchemaDef) -> Self {
        let mut changes = ChangeSet::default();
        for (table, cols) in &schema.tables {
            changes.create.table.push(TableDef {
                name: table.clone(),
                cols: cols.clone(),
            });
        }
        for (table, indexes) in &schema.indexes {
            for index in indexes {
                changes.create.index.push(IndexDef::new(table, index));
            }
        }
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
            && self.alter.is_empty()
            && self.remove.is_empty()
            && self.rename.is_empty()
            && self.raise.is_none()
    }

    /// Flatten into replay order: remove indexes, rename tables, create
    /// tables, alter tables (add, alter, drop columns), remove tables, create
    /// indexes
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops = Vec::new();

        for index in &self.remove.index {
            ops.push(Operation::DropIndex {
                table: index.table.clone(),
                name: index.name.clone(),
            });
        }
        for rename in &self.rename.table {
            ops.push(Operation::RenameTable {
                from: rename.from.clone(),
                to: rename.to.clone(),
            });
        }
        for table in &self.create.table {
            ops.push(Operation::CreateTable {
                table: table.name.clone(),
                columns: table.cols.clone(),
            });
        }
        for (table, alteration) in &self.alter.table {
            for column in alteration.add.values() {
                ops.push(Operation::AddColumn {
                    table: table.clone(),
                    column: column.clone(),
                });
            }
            for column in alteration.alter.values() {
                ops.push(Operation::AlterColumn {
                    table: table.clone(),
                    column: column.clone(),
                });
            }
            for column in &alteration.drop {
                ops.push(Operation::DropColumn {
                    table: table.clone(),
                    column: column.clone(),
                });
            }
        }
        for table in &self.remove.table {
            ops.push(Operation::DropTable(table.clone()));
        }
        for index in &self.create.index {
            ops.push(Operation::CreateIndex {
                table: index.table.clone(),
                index: index.descriptor(),
            });
        }

        ops
    }

    /// Apply to an in-memory schema, failing on any inconsistency
    pub fn apply(&self, schema: &mut SchemaDef, source: &str) -> Result<()> {
        if let Some(message) = &self.raise {
            return Err(MigrateError::malformed(source, message.clone()));
        }
        for op in self.operations() {
            op.apply(schema)
                .map_err(|reason| MigrateError::malformed(source, format!("{}: {}", op, reason)))?;
        }
        Ok(())
    }

    /// Operator-facing summary lines
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut count = |sign: &str, what: &str, n: usize| {
            if n > 0 {
                lines.push(format!("{} {} count: {}", sign, what, n));
            }
        };
        count("+", "Create table", self.create.table.len());
        count(">", "Alter table", self.alter.table.len());
        count("-", "Remove table", self.remove.table.len());
        count(">", "Rename table", self.rename.table.len());
        count("+", "Create index", self.create.index.len());
        count("-", "Remove index", self.remove.index.len());
        lines
    }
}

impl Operation {
    fn apply(&self, schema: &mut SchemaDef) -> std::result::Result<(), String> {
        match self {
            Operation::DropIndex { table, name } => {
                let indexes = schema.indexes.get_mut(table).ok_or("table has no indexes")?;
                let before = indexes.len();
                indexes.retain(|i| &i.name != name);
                if indexes.len() == before {
                    return Err("index does not exist".into());
                }
                if indexes.is_empty() {
                    schema.indexes.remove(table);
                }
            }
            Operation::RenameTable { from, to } => {
                if schema.tables.contains_key(to) {
                    return Err("target table already exists".into());
                }
                let columns = schema.tables.remove(from).ok_or("table does not exist")?;
                schema.tables.insert(to.clone(), columns);
                if let Some(indexes) = schema.indexes.remove(from) {
                    schema.indexes.insert(to.clone(), indexes);
                }
            }
            Operation::CreateTable { table, columns } => {
                if schema.tables.contains_key(table) {
                    return Err("table already exists".into());
                }
                let mut columns = columns.clone();
                SchemaDef::renumber(&mut columns);
                schema.tables.insert(table.clone(), columns);
            }
            Operation::AddColumn { table, column } => {
                let columns = schema.tables.get_mut(table).ok_or("table does not exist")?;
                if columns.iter().any(|c| c.name == column.name) {
                    return Err("column already exists".into());
                }
                columns.push(column.clone());
                SchemaDef::renumber(columns);
            }
            Operation::AlterColumn { table, column } => {
                let columns = schema.tables.get_mut(table).ok_or("table does not exist")?;
                let slot = columns
                    .iter_mut()
                    .find(|c| c.name == column.name)
                    .ok_or("column does not exist")?;
                *slot = column.clone();
                SchemaDef::renumber(columns);
            }
            Operation::DropColumn { table, column } => {
                let columns = schema.tables.get_mut(table).ok_or("table does not exist")?;
                let before = columns.len();
                columns.retain(|c| &c.name != column);
                if columns.len() == before {
                    return Err("column does not exist".into());
                }
                SchemaDef::renumber(columns);
                if let Some(indexes) = schema.indexes.get_mut(table) {
                    indexes.retain(|i| !i.columns.contains(column));
                    if indexes.is_empty() {
                        schema.indexes.remove(table);
                    }
                }
            }
            Operation::DropTable(table) => {
                schema.tables.remove(table).ok_or("table does not exist")?;
                schema.indexes.remove(table);
            }
            Operation::CreateIndex { table, index } => {
                if !schema.tables.contains_key(table) {
                    return Err("table does not exist".into());
                }
                let indexes = schema.indexes.entry(table.clone()).or_default();
                if indexes.iter().any(|i| i.name == index.name) {
                    return Err("index already exists".into());
                }
                indexes.push(index.clone());
            }
        }
        Ok(())
    }
}

/// Up and down change sets of one migration file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationScript {
    pub up: ChangeSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down: Option<ChangeSet>,
}

impl MigrationScript {
    pub fn from_value(value: &Value, source: &str) -> Result<Self> {
        let up = value
            .get("up")
            .ok_or_else(|| MigrateError::malformed(source, "missing 'up' change set"))?;
        let down = match value.get("down") {
            Some(Value::Null) | None => None,
            Some(down) => Some(ChangeSet::from_value(down, source)?),
        };
        Ok(Self {
            up: ChangeSet::from_value(up, source)?,
            down,
        })
    }

    /// A script with nothing to do in the up direction
    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }
}
