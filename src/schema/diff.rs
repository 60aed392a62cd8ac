//! Schema differ
//!
//! Compares the stored snapshot with the live schema and produces the up and
//! down change sets of a migration. The diff covers tables, column
//! definitions, renames and indexes. Every change carries the full old
//! descriptor in its down branch, so `down` is the exact inverse of `up`.

use indexmap::IndexMap;
use std::collections::BTreeMap;
use tracing::info;

use super::changeset::{
    ChangeSet, IndexDef, IndexRef, MigrationScript, TableAlteration, TableDef, TableRename,
};
use super::{same_columns, ColumnDescriptor, IndexDescriptor, QualifiedName, SchemaDef};
use crate::error::{MigrateError, Result};

pub const INITIAL_DOWN_MESSAGE: &str = "Can not revert initial snapshot";

/// Column differences of one table; `drop` keeps the old descriptors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnDiff {
    pub add: IndexMap<String, ColumnDescriptor>,
    pub alter: IndexMap<String, ColumnDescriptor>,
    pub drop: IndexMap<String, ColumnDescriptor>,
}

impl ColumnDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.alter.is_empty() && self.drop.is_empty()
    }
}

/// Compare the columns of `new` against `old` by name
pub fn diff_columns(new: &[ColumnDescriptor], old: &[ColumnDescriptor]) -> ColumnDiff {
    let mut diff = ColumnDiff::default();

    for column in new {
        match old.iter().find(|c| c.name == column.name) {
            None => {
                info!("Column '{}' is new", column.name);
                diff.add.insert(column.name.clone(), column.clone());
            }
            Some(previous) if !previous.same_definition(column) => {
                info!("Column '{}' has changed", column.name);
                diff.alter.insert(column.name.clone(), column.clone());
            }
            Some(_) => {}
        }
    }

    for column in old {
        if !new.iter().any(|c| c.name == column.name) {
            info!("Column '{}' has been removed", column.name);
            diff.drop.insert(column.name.clone(), column.clone());
        }
    }

    diff
}

/// Diff the live schema against the stored one
///
/// Without a stored schema the result is an initial snapshot whose down
/// branch refuses to run. `confirmed` renames settle pairings the differ
/// cannot infer on its own.
pub fn diff_schemas(
    stored: Option<&SchemaDef>,
    live: &SchemaDef,
    confirmed: &[TableRename],
) -> Result<MigrationScript> {
    let initial = stored.is_none();
    let empty = SchemaDef::default();
    let stored = stored.unwrap_or(&empty);

    let mut created: Vec<QualifiedName> = live
        .tables
        .keys()
        .filter(|t| !stored.tables.contains_key(*t))
        .cloned()
        .collect();
    let mut removed: Vec<QualifiedName> = stored
        .tables
        .keys()
        .filter(|t| !live.tables.contains_key(*t))
        .cloned()
        .collect();

    let renames = infer_renames(stored, live, &created, &removed, confirmed)?;
    created.retain(|t| !renames.iter().any(|r| &r.to == t));
    removed.retain(|t| !renames.iter().any(|r| &r.from == t));

    let mut up = ChangeSet::default();
    let mut down = ChangeSet::default();

    for table in &created {
        info!("Table '{}' is new", table);
        up.create.table.push(TableDef {
            name: table.clone(),
            cols: live.tables[table].clone(),
        });
        down.remove.table.push(table.clone());
    }

    for (table, columns) in &live.tables {
        let Some(previous) = stored.tables.get(table) else {
            continue;
        };
        let diff = diff_columns(columns, previous);
        if diff.is_empty() {
            continue;
        }
        info!("Table '{}' has changed", table);
        let reverted: IndexMap<String, ColumnDescriptor> = diff
            .alter
            .keys()
            .filter_map(|name| previous.iter().find(|c| &c.name == name))
            .map(|c| (c.name.clone(), c.clone()))
            .collect();
        down.alter.table.insert(
            table.clone(),
            TableAlteration {
                add: diff.drop.clone(),
                alter: reverted,
                drop: diff.add.keys().cloned().collect(),
            },
        );
        up.alter.table.insert(
            table.clone(),
            TableAlteration {
                add: diff.add,
                alter: diff.alter,
                drop: diff.drop.into_keys().collect(),
            },
        );
    }

    for table in &removed {
        info!("Table '{}' has been removed", table);
        up.remove.table.push(table.clone());
        down.create.table.push(TableDef {
            name: table.clone(),
            cols: stored.tables[table].clone(),
        });
    }

    for rename in &renames {
        up.rename.table.push(rename.clone());
        down.rename.table.push(rename.inverse());
    }

    diff_indexes(stored, live, &renames, &mut up, &mut down);

    if initial {
        down = ChangeSet {
            raise: Some(INITIAL_DOWN_MESSAGE.to_string()),
            ..ChangeSet::default()
        };
    }

    Ok(MigrationScript {
        up,
        down: Some(down),
    })
}

/// Pair created with removed tables whose columns are identical
///
/// A pairing is accepted only when it is unique both ways. Anything else is
/// an error the operator resolves with confirmed renames.
fn infer_renames(
    stored: &SchemaDef,
    live: &SchemaDef,
    created: &[QualifiedName],
    removed: &[QualifiedName],
    confirmed: &[TableRename],
) -> Result<Vec<TableRename>> {
    for rename in confirmed {
        if !removed.contains(&rename.from) || !created.contains(&rename.to) {
            return Err(MigrateError::InvalidRename {
                from: rename.from.clone(),
                to: rename.to.clone(),
            });
        }
    }

    let open_created: Vec<&QualifiedName> = created
        .iter()
        .filter(|t| !confirmed.iter().any(|r| &r.to == *t))
        .collect();
    let open_removed: Vec<&QualifiedName> = removed
        .iter()
        .filter(|t| !confirmed.iter().any(|r| &r.from == *t))
        .collect();

    let matches = |new: &QualifiedName, old: &QualifiedName| {
        new.schema == old.schema && same_columns(&live.tables[new], &stored.tables[old])
    };

    let mut renames = confirmed.to_vec();
    for &new in &open_created {
        let candidates: Vec<QualifiedName> = open_removed
            .iter()
            .filter(|&&old| matches(new, old))
            .map(|&old| old.clone())
            .collect();
        if candidates.len() > 1 {
            return Err(MigrateError::AmbiguousRename {
                table: new.clone(),
                candidates,
            });
        }
        let Some(old) = candidates.first() else {
            continue;
        };

        let reverse: Vec<QualifiedName> = open_created
            .iter()
            .filter(|&&other| matches(other, old))
            .map(|&other| other.clone())
            .collect();
        if reverse.len() > 1 {
            return Err(MigrateError::AmbiguousRename {
                table: old.clone(),
                candidates: reverse,
            });
        }

        info!("Table '{}' appears to have been renamed to '{}'", old, new);
        renames.push(TableRename {
            from: old.clone(),
            to: new.clone(),
        });
    }
    Ok(renames)
}

/// Index location: the table it sits on now, and its descriptor
struct IndexEntry<'a> {
    table: &'a QualifiedName,
    index: &'a IndexDescriptor,
}

fn index_entries(schema: &SchemaDef) -> BTreeMap<(String, String), IndexEntry<'_>> {
    schema
        .indexes
        .iter()
        .flat_map(|(table, indexes)| {
            indexes.iter().map(move |index| {
                (
                    (table.schema.clone(), index.name.clone()),
                    IndexEntry { table, index },
                )
            })
        })
        .collect()
}

/// Indexes are identified by schema and name. Stored indexes follow their
/// table through accepted renames before they are compared.
fn diff_indexes(
    stored: &SchemaDef,
    live: &SchemaDef,
    renames: &[TableRename],
    up: &mut ChangeSet,
    down: &mut ChangeSet,
) {
    let renamed = |table: &QualifiedName| {
        renames
            .iter()
            .find(|r| &r.from == table)
            .map(|r| r.to.clone())
            .unwrap_or_else(|| table.clone())
    };
    let old = index_entries(stored);
    let new = index_entries(live);

    for (key, entry) in &new {
        if let Some(previous) = old.get(key) {
            if &renamed(previous.table) == entry.table && previous.index == entry.index {
                continue;
            }
            info!("Index '{}' has changed", entry.index.name);
            up.remove.index.push(IndexRef {
                table: previous.table.clone(),
                name: previous.index.name.clone(),
            });
            down.create.index.push(IndexDef::new(previous.table, previous.index));
        } else {
            info!("Index '{}' is new", entry.index.name);
        }
        up.create.index.push(IndexDef::new(entry.table, entry.index));
        down.remove.index.push(IndexRef {
            table: entry.table.clone(),
            name: entry.index.name.clone(),
        });
    }

    for (key, entry) in &old {
        if new.contains_key(key) {
            continue;
        }
        info!("Index '{}' has been removed", entry.index.name);
        up.remove.index.push(IndexRef {
            table: entry.table.clone(),
            name: entry.index.name.clone(),
        });
        down.create.index.push(IndexDef::new(entry.table, entry.index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;

    fn qn(name: &str) -> QualifiedName {
        QualifiedName::new("main", name)
    }

    fn col(name: &str) -> ColumnDescriptor {
        ColumnDescriptor::new(name, DataType::Text)
    }

    fn schema(tables: &[(&str, Vec<ColumnDescriptor>)]) -> SchemaDef {
        let mut schema = SchemaDef::default();
        for (name, cols) in tables {
            schema.tables.insert(qn(name), cols.clone());
        }
        schema
    }

    fn index(name: &str, columns: &[&str], unique: bool) -> IndexDescriptor {
        IndexDescriptor {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        }
    }

    /// Apply up to `stored`, check it matches `live`, apply down, check it
    /// matches `stored` again
    fn assert_round_trip(stored: &SchemaDef, live: &SchemaDef, script: &MigrationScript) {
        let mut forward = stored.clone();
        script.up.apply(&mut forward, "up").unwrap();
        assert!(forward.same_structure(live), "up: {:#?}", forward);

        let mut back = forward;
        script.down.as_ref().unwrap().apply(&mut back, "down").unwrap();
        assert!(back.same_structure(stored), "down: {:#?}", back);
    }

    #[test]
    fn test_diff_columns() {
        let old = vec![col("id"), col("email"), col("nick")];
        let new = vec![col("id"), col("email").not_null(), col("age")];

        let diff = diff_columns(&new, &old);
        assert_eq!(diff.add.keys().collect::<Vec<_>>(), vec!["age"]);
        assert_eq!(diff.drop.keys().collect::<Vec<_>>(), vec!["nick"]);
        assert_eq!(diff.alter.keys().collect::<Vec<_>>(), vec!["email"]);
        assert!(diff.alter["email"].not_null);

        assert!(diff_columns(&old, &old).is_empty());
    }

    #[test]
    fn test_ordinal_position_is_not_a_change() {
        let old = vec![col("id"), col("email")];
        let mut new = old.clone();
        new[1].ordinal_position = Some(2);
        assert!(diff_columns(&new, &old).is_empty());
    }

    #[test]
    fn test_initial_snapshot() {
        let mut live = schema(&[("users", vec![col("id")])]);
        live.indexes.insert(qn("users"), vec![index("idx_users_id", &["id"], true)]);

        let script = diff_schemas(None, &live, &[]).unwrap();
        assert_eq!(script.up.create.table.len(), 1);
        assert_eq!(script.up.create.index.len(), 1);
        let down = script.down.unwrap();
        assert_eq!(down.raise.as_deref(), Some(INITIAL_DOWN_MESSAGE));
        assert!(down.remove.is_empty());
    }

    #[test]
    fn test_no_changes() {
        let live = schema(&[("users", vec![col("id")])]);
        let script = diff_schemas(Some(&live), &live, &[]).unwrap();
        assert!(script.is_empty());
    }

    #[test]
    fn test_full_round_trip() {
        let mut stored = schema(&[
            ("users", vec![col("id"), col("email"), col("nick")]),
            ("legacy", vec![col("payload")]),
        ]);
        stored.indexes.insert(qn("users"), vec![index("idx_users_email", &["email"], false)]);
        stored.indexes.insert(qn("legacy"), vec![index("idx_legacy", &["payload"], false)]);

        let mut live = schema(&[
            ("users", vec![col("id"), col("email").not_null(), col("age")]),
            ("posts", vec![col("id"), col("title")]),
        ]);
        live.indexes.insert(qn("users"), vec![index("idx_users_email", &["email"], true)]);
        live.indexes.insert(qn("posts"), vec![index("idx_posts_title", &["title"], false)]);

        let script = diff_schemas(Some(&stored), &live, &[]).unwrap();
        assert_eq!(script.up.create.table[0].name, qn("posts"));
        assert_eq!(script.up.remove.table, vec![qn("legacy")]);
        assert!(script.up.rename.is_empty());
        let alteration = &script.up.alter.table[&qn("users")];
        assert_eq!(alteration.drop, vec!["nick"]);
        assert!(alteration.alter["email"].not_null);

        let down = script.down.as_ref().unwrap();
        assert!(!down.alter.table[&qn("users")].alter["email"].not_null);

        assert_round_trip(&stored, &live, &script);
    }

    #[test]
    fn test_rename_inference() {
        let mut stored = schema(&[("a", vec![col("col1"), col("col2")])]);
        let mut live = schema(&[("b", vec![col("col2"), col("col1")])]);
        live.indexes.insert(qn("b"), vec![index("idx_col1", &["col1"], false)]);
        stored.indexes.insert(qn("a"), vec![index("idx_col1", &["col1"], false)]);

        let script = diff_schemas(Some(&stored), &live, &[]).unwrap();
        assert_eq!(
            script.up.rename.table,
            vec![TableRename { from: qn("a"), to: qn("b") }]
        );
        assert!(script.up.create.is_empty());
        assert!(script.up.remove.is_empty());
        assert_eq!(
            script.down.as_ref().unwrap().rename.table,
            vec![TableRename { from: qn("b"), to: qn("a") }]
        );

        assert_round_trip(&stored, &live, &script);
    }

    #[test]
    fn test_ambiguous_rename() {
        let stored = schema(&[("a", vec![col("x")]), ("b", vec![col("x")])]);
        let live = schema(&[("c", vec![col("x")])]);

        let err = diff_schemas(Some(&stored), &live, &[]).unwrap_err();
        match err {
            MigrateError::AmbiguousRename { table, candidates } => {
                assert_eq!(table, qn("c"));
                assert_eq!(candidates, vec![qn("a"), qn("b")]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let confirmed = [TableRename { from: qn("b"), to: qn("c") }];
        let script = diff_schemas(Some(&stored), &live, &confirmed).unwrap();
        assert_eq!(script.up.rename.table, confirmed.to_vec());
        assert_eq!(script.up.remove.table, vec![qn("a")]);
        assert_round_trip(&stored, &live, &script);
    }

    #[test]
    fn test_ambiguous_reverse_match() {
        let stored = schema(&[("a", vec![col("x")])]);
        let live = schema(&[("b", vec![col("x")]), ("c", vec![col("x")])]);
        assert!(matches!(
            diff_schemas(Some(&stored), &live, &[]),
            Err(MigrateError::AmbiguousRename { .. })
        ));
    }

    #[test]
    fn test_confirmed_rename_must_exist() {
        let stored = schema(&[("a", vec![col("x")])]);
        let live = schema(&[("b", vec![col("y")])]);
        let confirmed = [TableRename { from: qn("missing"), to: qn("b") }];
        assert!(matches!(
            diff_schemas(Some(&stored), &live, &confirmed),
            Err(MigrateError::InvalidRename { .. })
        ));

        // Different columns: create + remove, no rename
        let script = diff_schemas(Some(&stored), &live, &[]).unwrap();
        assert!(script.up.rename.is_empty());
        assert_round_trip(&stored, &live, &script);
    }
}
