//! Migration player: replays change sets against a driver

use serde::Serialize;
use std::fmt;

use super::files::MigrationFile;
use super::log::MigrationLog;
use crate::driver::SchemaDriver;
use crate::error::{MigrateError, Result};
use crate::schema::{ChangeSet, Operation, INITIAL_DOWN_MESSAGE};
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// The change set a file contributes in the given direction
pub(crate) fn changes_for(
    file: MigrationFile,
    version: Version,
    direction: Direction,
) -> Result<ChangeSet> {
    let changes = match (file, direction) {
        (MigrationFile::Initial { schema, .. }, Direction::Up) => ChangeSet::creating(&schema),
        (MigrationFile::Initial { .. }, Direction::Down) => {
            return Err(MigrateError::Irreversible {
                version,
                reason: INITIAL_DOWN_MESSAGE.to_string(),
            })
        }
        (MigrationFile::Incremental(script), Direction::Up) => script.up,
        (MigrationFile::Incremental(script), Direction::Down) => {
            script.down.ok_or_else(|| MigrateError::Irreversible {
                version,
                reason: "migration has no down branch".to_string(),
            })?
        }
    };

    if let Some(reason) = &changes.raise {
        return Err(match direction {
            Direction::Down => MigrateError::Irreversible {
                version,
                reason: reason.clone(),
            },
            Direction::Up => MigrateError::malformed(version.to_string(), reason.clone()),
        });
    }
    Ok(changes)
}

/// Run every operation of a change set, in replay order
pub(crate) fn replay(
    driver: &dyn SchemaDriver,
    changes: &ChangeSet,
    log: &mut MigrationLog,
) -> Result<()> {
    for op in changes.operations() {
        log.info(format!("  {}", op));
        execute(driver, &op)?;
    }
    Ok(())
}

fn execute(driver: &dyn SchemaDriver, op: &Operation) -> Result<()> {
    match op {
        Operation::DropIndex { table, name } => driver.drop_index(table, name),
        Operation::RenameTable { from, to } => driver.rename_table(from, to),
        Operation::CreateTable { table, columns } => driver.create_table(table, columns),
        Operation::AddColumn { table, column } => driver.add_column(table, column),
        Operation::AlterColumn { table, column } => driver.alter_column(table, column),
        Operation::DropColumn { table, column } => driver.drop_column(table, column),
        Operation::DropTable(table) => driver.drop_table(table),
        Operation::CreateIndex { table, index } => driver.create_index(table, index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SqliteDriver;
    use crate::schema::{
        describe, ColumnDescriptor, DataType, MigrationScript, QualifiedName, SchemaDef,
    };

    fn users_schema() -> SchemaDef {
        let mut schema = SchemaDef::default();
        schema.tables.insert(
            QualifiedName::new("main", "users"),
            vec![
                ColumnDescriptor::new("id", DataType::Integer).primary_key(),
                ColumnDescriptor::new("email", DataType::Text).not_null(),
            ],
        );
        schema
    }

    #[test]
    fn test_initial_file_creates_schema() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let file = MigrationFile::Initial {
            version: Version::new(1),
            schema: users_schema(),
        };
        let changes = changes_for(file, Version::new(1), Direction::Up).unwrap();
        replay(&driver, &changes, &mut MigrationLog::default()).unwrap();
        assert!(describe(&driver, &[]).unwrap().same_structure(&users_schema()));
    }

    #[test]
    fn test_initial_file_is_irreversible() {
        let file = MigrationFile::Initial {
            version: Version::new(1),
            schema: users_schema(),
        };
        assert!(matches!(
            changes_for(file, Version::new(1), Direction::Down),
            Err(MigrateError::Irreversible { .. })
        ));
    }

    #[test]
    fn test_missing_down_and_raise() {
        let script = MigrationScript {
            up: ChangeSet::default(),
            down: None,
        };
        assert!(matches!(
            changes_for(MigrationFile::Incremental(script), Version::new(2), Direction::Down),
            Err(MigrateError::Irreversible { .. })
        ));

        let script = MigrationScript {
            up: ChangeSet::default(),
            down: Some(ChangeSet {
                raise: Some("data loss".to_string()),
                ..ChangeSet::default()
            }),
        };
        match changes_for(MigrationFile::Incremental(script), Version::new(2), Direction::Down) {
            Err(MigrateError::Irreversible { reason, .. }) => assert_eq!(reason, "data loss"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
