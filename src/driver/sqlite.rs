//! SQLite driver
//!
//! Catalog reads go through the `pragma_*` table-valued functions. Single
//! column UNIQUE constraints and foreign keys are reported on the column they
//! belong to; multi-column ones are skipped with a warning. DDL that SQLite
//! cannot express with `ALTER TABLE` (changing a column definition, adding or
//! dropping constrained columns, adding `NOT NULL` columns without a default)
//! is done by rebuilding the table: create a replacement, copy the
//! shared columns, drop the original, rename the replacement and recreate the
//! indexes that still apply.

use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use super::SchemaDriver;
use crate::config::DatabaseConfig;
use crate::error::{MigrateError, Result};
use crate::schema::{ColumnDescriptor, DataType, ForeignKey, IndexDescriptor, QualifiedName};
use crate::version::Version;

const DEFAULT_SCHEMA: &str = "main";
const REBUILD_PREFIX: &str = "__rebuild_";

pub struct SqliteDriver {
    conn: Connection,
}

impl SqliteDriver {
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let path = PathBuf::from(shellexpand::tilde(&config.path).to_string());

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn execute(&self, sql: &str) -> Result<()> {
        debug!(sql, "executing");
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Catalog objects of one `sqlite_master` type in every attached schema
    fn catalog_names(&self, kind: &str) -> Result<Vec<QualifiedName>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_database_list WHERE name <> 'temp' ORDER BY seq")?;
        let schemas = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut objects = Vec::new();
        for schema in schemas {
            let mut stmt = self.conn.prepare(&format!(
                r#"SELECT name FROM {}.sqlite_master
                   WHERE type = ?1 AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
                   ORDER BY name"#,
                quote(&schema)
            ))?;
            let names = stmt
                .query_map(params![kind], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            objects.extend(names.into_iter().map(|n| QualifiedName::new(&schema, n)));
        }
        Ok(objects)
    }

    /// Column names of an index, `None` for expression columns
    fn index_columns(&self, schema: &str, index: &str) -> Result<Vec<Option<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_index_info(?1, ?2) ORDER BY seqno")?;
        let columns = stmt
            .query_map(params![index, schema], |row| row.get::<_, Option<String>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// Columns carrying a single-column UNIQUE constraint
    fn unique_columns(&self, table: &QualifiedName) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT name FROM pragma_index_list(?1, ?2)
               WHERE origin = 'u'
               ORDER BY name"#,
        )?;
        let names = stmt
            .query_map(params![table.name, table.schema], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut unique = Vec::new();
        for name in names {
            match self.index_columns(&table.schema, &name)?.as_slice() {
                [Some(column)] => unique.push(column.clone()),
                _ => warn!(index = %name, table = %table, "skipping multi-column unique constraint"),
            }
        }
        Ok(unique)
    }

    /// Single-column foreign keys, paired with the referencing column
    fn foreign_keys(&self, table: &QualifiedName) -> Result<Vec<(String, ForeignKey)>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, "from", "table", "to", on_update, on_delete
               FROM pragma_foreign_key_list(?1, ?2)
               ORDER BY id, seq"#,
        )?;
        let rows = stmt
            .query_map(params![table.name, table.schema], |row| {
                let key = ForeignKey {
                    table: row.get(2)?,
                    column: row.get(3)?,
                    on_update: referential_action(row.get(4)?),
                    on_delete: referential_action(row.get(5)?),
                };
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, key))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut grouped: BTreeMap<i64, Vec<(String, ForeignKey)>> = BTreeMap::new();
        for (id, from, key) in rows {
            grouped.entry(id).or_default().push((from, key));
        }

        let mut keys = Vec::new();
        for (_, mut parts) in grouped {
            if parts.len() == 1 {
                keys.extend(parts.pop());
            } else {
                warn!(table = %table, "skipping composite foreign key");
            }
        }
        Ok(keys)
    }

    fn rebuild(&self, table: &QualifiedName, columns: &[ColumnDescriptor]) -> Result<()> {
        debug!(table = %table, "rebuilding table");
        let indexes = self.list_indexes(table)?;
        let existing: HashSet<String> = self
            .describe_table(table)?
            .into_iter()
            .map(|c| c.name)
            .collect();

        let replacement =
            QualifiedName::new(&table.schema, format!("{}{}", REBUILD_PREFIX, table.name));
        self.create_table(&replacement, columns)?;

        let shared: Vec<String> = columns
            .iter()
            .filter(|c| existing.contains(&c.name))
            .map(|c| quote(&c.name))
            .collect();
        if !shared.is_empty() {
            let list = shared.join(", ");
            self.execute(&format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                qualified(&replacement),
                list,
                list,
                qualified(table)
            ))?;
        }

        self.drop_table(table)?;
        self.execute(&format!(
            "ALTER TABLE {} RENAME TO {}",
            qualified(&replacement),
            quote(&table.name)
        ))?;

        for index in indexes {
            let applies = index
                .columns
                .iter()
                .all(|name| columns.iter().any(|c| &c.name == name));
            if applies {
                self.create_index(table, &index)?;
            } else {
                debug!(index = %index.name, "index no longer applies after rebuild");
            }
        }
        Ok(())
    }
}

impl SchemaDriver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn default_schema(&self) -> &str {
        DEFAULT_SCHEMA
    }

    fn probe(&self) -> Result<String> {
        let now: String = self
            .conn
            .query_row("SELECT CURRENT_TIMESTAMP", [], |row| row.get(0))?;
        Ok(now)
    }

    fn list_tables(&self) -> Result<Vec<QualifiedName>> {
        self.catalog_names("table")
    }

    fn list_views(&self) -> Result<Vec<QualifiedName>> {
        self.catalog_names("view")
    }

    fn table_exists(&self, table: &QualifiedName) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
                quote(&table.schema)
            ),
            params![table.name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn describe_table(&self, table: &QualifiedName) -> Result<Vec<ColumnDescriptor>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT cid, name, type, "notnull", dflt_value, pk
               FROM pragma_table_info(?1, ?2)
               ORDER BY cid"#,
        )?;

        let rows = stmt.query_map(params![table.name, table.schema], |row| {
            let cid: i64 = row.get(0)?;
            let declared: String = row.get(2)?;
            let not_null: i64 = row.get(3)?;
            let pk: i64 = row.get(5)?;
            Ok(ColumnDescriptor {
                name: row.get(1)?,
                data_type: DataType::parse(&declared),
                not_null: not_null != 0,
                primarykey: pk > 0,
                unique: false,
                references: None,
                default: row.get(4)?,
                ordinal_position: Some(cid as u32 + 1),
                extra: Default::default(),
            })
        })?;
        let mut columns = rows.collect::<Result<Vec<_>, _>>()?;

        for name in self.unique_columns(table)? {
            if let Some(column) = columns.iter_mut().find(|c| c.name == name) {
                column.unique = true;
            }
        }
        for (name, key) in self.foreign_keys(table)? {
            if let Some(column) = columns.iter_mut().find(|c| c.name == name) {
                column.references = Some(key);
            }
        }
        Ok(columns)
    }

    fn list_indexes(&self, table: &QualifiedName) -> Result<Vec<IndexDescriptor>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT name, "unique" FROM pragma_index_list(?1, ?2)
               WHERE origin = 'c'
               ORDER BY name"#,
        )?;
        let listed = stmt
            .query_map(params![table.name, table.schema], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut indexes = Vec::new();
        for (name, unique) in listed {
            let columns = self.index_columns(&table.schema, &name)?;

            // Expression indexes have unnamed columns and are not modelled.
            let Some(columns) = columns.into_iter().collect::<Option<Vec<_>>>() else {
                warn!(index = %name, table = %table, "skipping expression index");
                continue;
            };
            indexes.push(IndexDescriptor {
                name,
                columns,
                unique: unique != 0,
            });
        }
        Ok(indexes)
    }

    fn create_table(&self, table: &QualifiedName, columns: &[ColumnDescriptor]) -> Result<()> {
        self.execute(&create_table_sql(table, columns))
    }

    fn drop_table(&self, table: &QualifiedName) -> Result<()> {
        self.execute(&format!("DROP TABLE {}", qualified(table)))
    }

    fn drop_view(&self, view: &QualifiedName) -> Result<()> {
        self.execute(&format!("DROP VIEW {}", qualified(view)))
    }

    fn add_column(&self, table: &QualifiedName, column: &ColumnDescriptor) -> Result<()> {
        let needs_rebuild = column.primarykey
            || column.unique
            || (column.not_null && column.default.is_none())
            || (column.references.is_some() && column.default.is_some())
            || column
                .default
                .as_deref()
                .is_some_and(|d| !is_constant_default(d));
        if needs_rebuild {
            let mut columns = self.describe_table(table)?;
            columns.push(column.clone());
            return self.rebuild(table, &columns);
        }
        self.execute(&format!(
            "ALTER TABLE {} ADD COLUMN {}",
            qualified(table),
            column_sql(column)
        ))
    }

    fn alter_column(&self, table: &QualifiedName, column: &ColumnDescriptor) -> Result<()> {
        let mut columns = self.describe_table(table)?;
        let slot = columns
            .iter_mut()
            .find(|c| c.name == column.name)
            .ok_or_else(|| MigrateError::InvalidName(format!("{}.{}", table, column.name)))?;
        *slot = column.clone();
        self.rebuild(table, &columns)
    }

    fn drop_column(&self, table: &QualifiedName, column: &str) -> Result<()> {
        let columns = self.describe_table(table)?;
        let target = columns
            .iter()
            .find(|c| c.name == column)
            .ok_or_else(|| MigrateError::InvalidName(format!("{}.{}", table, column)))?;
        // SQLite refuses to drop constrained or indexed columns in place.
        let indexed = self
            .list_indexes(table)?
            .iter()
            .any(|index| index.columns.iter().any(|c| c == column));
        if target.is_constrained() || indexed {
            let remaining: Vec<ColumnDescriptor> =
                columns.into_iter().filter(|c| c.name != column).collect();
            return self.rebuild(table, &remaining);
        }
        self.execute(&format!(
            "ALTER TABLE {} DROP COLUMN {}",
            qualified(table),
            quote(column)
        ))
    }

    fn rename_table(&self, from: &QualifiedName, to: &QualifiedName) -> Result<()> {
        if from.schema != to.schema {
            return Err(MigrateError::Unsupported(format!(
                "moving table '{}' to another schema ('{}')",
                from, to
            )));
        }
        self.execute(&format!(
            "ALTER TABLE {} RENAME TO {}",
            qualified(from),
            quote(&to.name)
        ))
    }

    fn create_index(&self, table: &QualifiedName, index: &IndexDescriptor) -> Result<()> {
        let columns: Vec<String> = index.columns.iter().map(|c| quote(c)).collect();
        self.execute(&format!(
            "CREATE {}INDEX {}.{} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            quote(&table.schema),
            quote(&index.name),
            quote(&table.name),
            columns.join(", ")
        ))
    }

    fn drop_index(&self, table: &QualifiedName, name: &str) -> Result<()> {
        self.execute(&format!("DROP INDEX {}.{}", quote(&table.schema), quote(name)))
    }

    fn begin(&self) -> Result<()> {
        self.execute("BEGIN")
    }

    fn commit(&self) -> Result<()> {
        self.execute("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.execute("ROLLBACK")
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn ledger_versions(&self, ledger: &QualifiedName) -> Result<Vec<Version>> {
        if !self.table_exists(ledger)? {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT version FROM {} ORDER BY version", qualified(ledger)))?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0).map(Version::new))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn insert_ledger_version(&self, ledger: &QualifiedName, version: Version) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO {} (version) VALUES (?1)", qualified(ledger)),
            params![version.as_i64()],
        )?;
        Ok(())
    }

    fn delete_ledger_version(&self, ledger: &QualifiedName, version: Version) -> Result<()> {
        self.conn.execute(
            &format!("DELETE FROM {} WHERE version = ?1", qualified(ledger)),
            params![version.as_i64()],
        )?;
        Ok(())
    }

    fn clear_ledger(&self, ledger: &QualifiedName) -> Result<()> {
        if self.table_exists(ledger)? {
            self.conn
                .execute(&format!("DELETE FROM {}", qualified(ledger)), [])?;
        }
        Ok(())
    }
}

// ============================================
// SQL BUILDING
// ============================================

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn qualified(table: &QualifiedName) -> String {
    format!("{}.{}", quote(&table.schema), quote(&table.name))
}

/// Defaults SQLite accepts verbatim, including in `ALTER TABLE ADD COLUMN`
fn is_constant_default(default: &str) -> bool {
    let d = default.trim();
    let upper = d.to_ascii_uppercase();
    d.starts_with('\'')
        || d.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+' || c == '.')
        || upper.starts_with("X'")
        || matches!(upper.as_str(), "NULL" | "TRUE" | "FALSE")
}

fn default_sql(default: &str) -> String {
    let d = default.trim();
    let upper = d.to_ascii_uppercase();
    let keyword = matches!(
        upper.as_str(),
        "CURRENT_TIME" | "CURRENT_DATE" | "CURRENT_TIMESTAMP"
    );
    if is_constant_default(d) || keyword || d.starts_with('(') {
        d.to_string()
    } else {
        format!("({})", d)
    }
}

/// `ON UPDATE`/`ON DELETE` action, `None` for the default `NO ACTION`
fn referential_action(action: String) -> Option<String> {
    let action = action.trim().to_ascii_uppercase();
    if action.is_empty() || action == "NO ACTION" {
        None
    } else {
        Some(action)
    }
}

fn references_sql(key: &ForeignKey) -> String {
    let mut sql = format!("REFERENCES {}", quote(&key.table));
    if let Some(column) = &key.column {
        sql.push_str(&format!(" ({})", quote(column)));
    }
    if let Some(action) = &key.on_update {
        sql.push_str(&format!(" ON UPDATE {}", action));
    }
    if let Some(action) = &key.on_delete {
        sql.push_str(&format!(" ON DELETE {}", action));
    }
    sql
}

fn column_sql(column: &ColumnDescriptor) -> String {
    let mut sql = quote(&column.name);
    let declared = column.data_type.as_sql();
    if !declared.is_empty() {
        sql.push(' ');
        sql.push_str(declared);
    }
    if column.not_null {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(&default_sql(default));
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(key) = &column.references {
        sql.push(' ');
        sql.push_str(&references_sql(key));
    }
    sql
}

fn create_table_sql(table: &QualifiedName, columns: &[ColumnDescriptor]) -> String {
    let mut defs: Vec<String> = columns.iter().map(column_sql).collect();
    let pk: Vec<String> = columns
        .iter()
        .filter(|c| c.primarykey)
        .map(|c| quote(&c.name))
        .collect();
    if !pk.is_empty() {
        defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }
    format!("CREATE TABLE {} ({})", qualified(table), defs.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> QualifiedName {
        QualifiedName::new("main", "users")
    }

    fn user_columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("id", DataType::Integer).primary_key(),
            ColumnDescriptor::new("email", DataType::Text).not_null(),
            ColumnDescriptor::new("status", DataType::Text)
                .not_null()
                .with_default("'active'"),
        ]
    }

    fn driver_with_users() -> SqliteDriver {
        let driver = SqliteDriver::open_in_memory().unwrap();
        driver.create_table(&users(), &user_columns()).unwrap();
        driver
    }

    fn names(columns: &[ColumnDescriptor]) -> Vec<&str> {
        columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_create_and_describe_round_trip() {
        let driver = driver_with_users();
        let described = driver.describe_table(&users()).unwrap();
        assert_eq!(described.len(), 3);
        for (expected, actual) in user_columns().iter().zip(&described) {
            assert!(expected.same_definition(actual), "{:?} vs {:?}", expected, actual);
        }
        assert_eq!(described[2].ordinal_position, Some(3));
        assert_eq!(driver.list_tables().unwrap(), vec![users()]);
        assert!(driver.table_exists(&users()).unwrap());
        assert!(!driver
            .table_exists(&QualifiedName::new("main", "missing"))
            .unwrap());
    }

    #[test]
    fn test_list_indexes_skips_automatic_indexes() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        driver
            .connection()
            .execute_batch("CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT UNIQUE)")
            .unwrap();
        let tags = QualifiedName::new("main", "tags");
        assert!(driver.list_indexes(&tags).unwrap().is_empty());

        let index = IndexDescriptor {
            name: "idx_tags_label".to_string(),
            columns: vec!["label".to_string()],
            unique: false,
        };
        driver.create_index(&tags, &index).unwrap();
        assert_eq!(driver.list_indexes(&tags).unwrap(), vec![index.clone()]);

        driver.drop_index(&tags, &index.name).unwrap();
        assert!(driver.list_indexes(&tags).unwrap().is_empty());
    }

    #[test]
    fn test_add_and_drop_columns() {
        let driver = driver_with_users();
        driver
            .add_column(&users(), &ColumnDescriptor::new("nickname", DataType::Text))
            .unwrap();
        // NOT NULL without default goes through a rebuild
        driver
            .add_column(
                &users(),
                &ColumnDescriptor::new("age", DataType::Integer).not_null(),
            )
            .unwrap();
        let described = driver.describe_table(&users()).unwrap();
        assert_eq!(names(&described), vec!["id", "email", "status", "nickname", "age"]);
        assert!(described[4].not_null);

        driver.drop_column(&users(), "nickname").unwrap();
        let described = driver.describe_table(&users()).unwrap();
        assert_eq!(names(&described), vec!["id", "email", "status", "age"]);
    }

    #[test]
    fn test_alter_column_keeps_rows_and_indexes() {
        let driver = driver_with_users();
        driver
            .connection()
            .execute(
                "INSERT INTO users (id, email) VALUES (1, 'a@example.com')",
                [],
            )
            .unwrap();
        let index = IndexDescriptor {
            name: "idx_users_email".to_string(),
            columns: vec!["email".to_string()],
            unique: true,
        };
        driver.create_index(&users(), &index).unwrap();

        let relaxed = ColumnDescriptor::new("email", DataType::Other("VARCHAR(255)".into()));
        driver.alter_column(&users(), &relaxed).unwrap();

        let described = driver.describe_table(&users()).unwrap();
        assert!(described[1].same_definition(&relaxed));
        assert_eq!(driver.list_indexes(&users()).unwrap(), vec![index]);
        let email: String = driver
            .connection()
            .query_row("SELECT email FROM users WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(email, "a@example.com");
        assert_eq!(driver.list_tables().unwrap(), vec![users()]);
    }

    #[test]
    fn test_rename_table() {
        let driver = driver_with_users();
        let accounts = QualifiedName::new("main", "accounts");
        driver.rename_table(&users(), &accounts).unwrap();
        assert_eq!(driver.list_tables().unwrap(), vec![accounts.clone()]);

        let elsewhere = QualifiedName::new("other", "accounts");
        assert!(matches!(
            driver.rename_table(&accounts, &elsewhere),
            Err(MigrateError::Unsupported(_))
        ));
    }

    #[test]
    fn test_rollback_discards_ddl() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        driver.begin().unwrap();
        assert!(driver.in_transaction());
        driver.create_table(&users(), &user_columns()).unwrap();
        driver.rollback().unwrap();
        assert!(!driver.in_transaction());
        assert!(driver.list_tables().unwrap().is_empty());
    }

    #[test]
    fn test_ledger_rows() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let ledger = QualifiedName::new("main", "schema_info");
        assert!(driver.ledger_versions(&ledger).unwrap().is_empty());

        driver
            .create_table(
                &ledger,
                &[ColumnDescriptor::new("version", DataType::BigInt)
                    .not_null()
                    .primary_key()],
            )
            .unwrap();
        driver
            .insert_ledger_version(&ledger, Version::new(20240102000000))
            .unwrap();
        driver
            .insert_ledger_version(&ledger, Version::new(20240101000000))
            .unwrap();
        assert_eq!(
            driver.ledger_versions(&ledger).unwrap(),
            vec![Version::new(20240101000000), Version::new(20240102000000)]
        );

        driver
            .delete_ledger_version(&ledger, Version::new(20240102000000))
            .unwrap();
        assert_eq!(driver.ledger_versions(&ledger).unwrap().len(), 1);
        driver.clear_ledger(&ledger).unwrap();
        assert!(driver.ledger_versions(&ledger).unwrap().is_empty());
    }

    #[test]
    fn test_default_sql_wraps_expressions() {
        assert_eq!(default_sql("'x'"), "'x'");
        assert_eq!(default_sql("0"), "0");
        assert_eq!(default_sql("CURRENT_TIMESTAMP"), "CURRENT_TIMESTAMP");
        assert_eq!(default_sql("datetime('now')"), "(datetime('now'))");
    }

    fn tags() -> QualifiedName {
        QualifiedName::new("main", "tags")
    }

    fn insert_labels(driver: &SqliteDriver) -> rusqlite::Result<usize> {
        driver
            .connection()
            .execute("INSERT INTO tags (id, label) VALUES (1, 'x'), (2, 'x')", [])
    }

    #[test]
    fn test_describe_reports_column_constraints() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        driver
            .connection()
            .execute_batch(
                r#"
                CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT UNIQUE, a TEXT, b TEXT, UNIQUE (a, b));
                CREATE TABLE posts (
                    id INTEGER PRIMARY KEY,
                    tag_id INTEGER REFERENCES tags (id) ON DELETE CASCADE,
                    parent INTEGER REFERENCES posts
                );
                "#,
            )
            .unwrap();

        let described = driver.describe_table(&tags()).unwrap();
        let unique: Vec<&str> = described
            .iter()
            .filter(|c| c.unique)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(unique, vec!["label"]);

        let posts = driver
            .describe_table(&QualifiedName::new("main", "posts"))
            .unwrap();
        assert_eq!(
            posts[1].references,
            Some(ForeignKey::new("tags", Some("id")).on_delete("CASCADE"))
        );
        assert_eq!(posts[2].references, Some(ForeignKey::new("posts", None)));
        assert!(posts[0].references.is_none());
    }

    #[test]
    fn test_created_constraints_round_trip_and_are_enforced() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let columns = vec![
            ColumnDescriptor::new("id", DataType::Integer).primary_key(),
            ColumnDescriptor::new("label", DataType::Text).unique(),
        ];
        driver.create_table(&tags(), &columns).unwrap();
        let owner = ColumnDescriptor::new("tag_id", DataType::Integer)
            .references(ForeignKey::new("tags", Some("id")).on_delete("SET NULL"));
        let posts = QualifiedName::new("main", "posts");
        driver
            .create_table(
                &posts,
                &[
                    ColumnDescriptor::new("id", DataType::Integer).primary_key(),
                    owner.clone(),
                ],
            )
            .unwrap();

        let described = driver.describe_table(&tags()).unwrap();
        for (expected, actual) in columns.iter().zip(&described) {
            assert!(expected.same_definition(actual), "{:?} vs {:?}", expected, actual);
        }
        assert!(driver.describe_table(&posts).unwrap()[1].same_definition(&owner));
        assert!(insert_labels(&driver).is_err());
    }

    #[test]
    fn test_add_and_drop_unique_column() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        driver
            .create_table(
                &tags(),
                &[ColumnDescriptor::new("id", DataType::Integer).primary_key()],
            )
            .unwrap();
        driver
            .connection()
            .execute("INSERT INTO tags (id) VALUES (7)", [])
            .unwrap();

        driver
            .add_column(&tags(), &ColumnDescriptor::new("label", DataType::Text).unique())
            .unwrap();
        assert!(driver.describe_table(&tags()).unwrap()[1].unique);
        assert!(insert_labels(&driver).is_err());

        driver.drop_column(&tags(), "label").unwrap();
        let described = driver.describe_table(&tags()).unwrap();
        assert_eq!(names(&described), vec!["id"]);
        let id: i64 = driver
            .connection()
            .query_row("SELECT id FROM tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(id, 7);
    }

    #[test]
    fn test_drop_indexed_column_rebuilds() {
        let driver = driver_with_users();
        let index = IndexDescriptor {
            name: "idx_users_status".to_string(),
            columns: vec!["status".to_string()],
            unique: false,
        };
        driver.create_index(&users(), &index).unwrap();

        driver.drop_column(&users(), "status").unwrap();
        assert_eq!(names(&driver.describe_table(&users()).unwrap()), vec!["id", "email"]);
        assert!(driver.list_indexes(&users()).unwrap().is_empty());
        assert!(matches!(
            driver.drop_column(&users(), "missing"),
            Err(MigrateError::InvalidName(_))
        ));
    }

    #[test]
    fn test_views_are_listed_apart_from_tables() {
        let driver = driver_with_users();
        driver
            .connection()
            .execute_batch("CREATE VIEW active_users AS SELECT id, email FROM users")
            .unwrap();

        let view = QualifiedName::new("main", "active_users");
        assert_eq!(driver.list_views().unwrap(), vec![view.clone()]);
        assert_eq!(driver.list_tables().unwrap(), vec![users()]);

        driver.drop_view(&view).unwrap();
        assert!(driver.list_views().unwrap().is_empty());
    }
}
