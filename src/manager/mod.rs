//! Schema manager
//!
//! Ties the describer, differ, migration files, player and version ledger
//! together. Two modes:
//!
//! - snapshot: describe the live database, diff it against `schema.json`,
//!   write a migration file and refresh the snapshot
//! - migrate: replay migration files up or down until the ledger reaches a
//!   target version
//!
//! Every mutating call runs in a single transaction on the driver and is
//! rolled back as a whole on error. Files written by snapshot and checkpoint
//! are staged during the transaction and moved into place once it commits.

mod files;
mod ledger;
mod log;
mod player;


pub use files::{file_name, slug, MigrationEntry, MigrationFile};
pub use ledger::Ledger;
pub use log::{LogEntry, LogLevel, MigrationLog};
pub use player::Direction;

use serde::Serialize;
use std::path::PathBuf;

use crate::config::ManagerConfig;
use crate::driver::SchemaDriver;
use crate::error::{MigrateError, Result};
use crate::schema::{
    describe, diff_schemas, same_columns, ChangeSet, IndexDescriptor, MigrationScript,
    QualifiedName, SchemaDef, SchemaSnapshot, TableRename,
};
use crate::version::Version;
use files::StagedFiles;

const INITIAL_COMMENT: &str = "Initial Snapshot";
const SNAPSHOT_COMMENT: &str = "New Snapshot";
const CHECKPOINT_COMMENT: &str = "Checkpoint";

#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    pub comment: Option<String>,
    /// Diff and report, but write nothing
    pub dry_run: bool,
    /// Renames the differ cannot infer on its own
    pub renames: Vec<TableRename>,
    /// Use this version instead of the current time
    pub version: Option<Version>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Written { version: Version, path: PathBuf },
    Unchanged,
    /// The connectivity probe failed; nothing was written
    Aborted(String),
    DryRun(MigrationScript),
}

#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Replay everything, then roll back
    pub dry_run: bool,
    /// Accept pre-existing tables that match the snapshot when initialising
    pub keep_tables: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateOutcome {
    Initialised { version: Version },
    Replayed {
        direction: Direction,
        versions: Vec<Version>,
    },
    UpToDate(Version),
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: Version,
    pub comment: String,
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub current: Option<Version>,
    pub latest: Option<Version>,
    pub snapshot: Option<Version>,
    pub migrations: Vec<MigrationStatus>,
    /// Versions below the current one that were never applied
    pub missing: Vec<Version>,
}

impl Status {
    pub fn is_latest(&self) -> bool {
        self.current == self.latest
    }
}

enum Finish<T> {
    Commit(T),
    Rollback(T),
}

pub struct SchemaManager<'a> {
    driver: &'a dyn SchemaDriver,
    config: ManagerConfig,
    ledger_table: QualifiedName,
    ignore: Vec<QualifiedName>,
    log: MigrationLog,
}

impl<'a> SchemaManager<'a> {
    pub fn new(driver: &'a dyn SchemaDriver, config: ManagerConfig) -> Result<Self> {
        let default_schema = driver.default_schema();
        let ledger_table = QualifiedName::parse_with_default(&config.ledger_table, default_schema)?;

        let mut ignore = vec![ledger_table.clone()];
        for table in &config.ignore_tables {
            ignore.push(QualifiedName::parse_with_default(table, default_schema)?);
        }

        Ok(Self {
            driver,
            config,
            ledger_table,
            ignore,
            log: MigrationLog::default(),
        })
    }

    /// Schema that unqualified table names resolve to
    pub fn default_schema(&self) -> &str {
        self.driver.default_schema()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn log(&self) -> &MigrationLog {
        &self.log
    }

    pub fn take_log(&mut self) -> Vec<LogEntry> {
        self.log.take()
    }

    pub fn ledger(&self) -> Ledger<'a> {
        Ledger::new(self.driver, self.ledger_table.clone())
    }

    // ============================================
    // VERSIONS
    // ============================================

    /// Migration files, ascending by version
    pub fn schema_versions(&self) -> Result<Vec<MigrationEntry>> {
        files::scan(&self.config.migrate_dir_path())
    }

    pub fn versions(&self) -> Result<Vec<Version>> {
        Ok(self.schema_versions()?.into_iter().map(|e| e.version).collect())
    }

    pub fn latest_version(&self) -> Result<Option<Version>> {
        Ok(self.versions()?.last().copied())
    }

    pub fn current_version(&self) -> Result<Option<Version>> {
        self.ledger().current_version()
    }

    pub fn create_info_table(&self) -> Result<bool> {
        self.ledger().create_info_table()
    }

    /// The stored `schema.json`, if any
    pub fn stored_snapshot(&self) -> Result<Option<SchemaSnapshot>> {
        SchemaSnapshot::load(&self.config.schema_file_path())
    }

    /// The ledger is at the latest migration file version
    pub fn is_latest(&self) -> Result<bool> {
        match self.latest_version()? {
            Some(latest) => Ok(self.current_version()? == Some(latest)),
            None => Ok(true),
        }
    }

    pub fn status(&self) -> Result<Status> {
        let entries = self.schema_versions()?;
        let applied = self.ledger().applied_versions()?;
        let current = applied.last().copied();

        let migrations: Vec<MigrationStatus> = entries
            .iter()
            .map(|e| MigrationStatus {
                version: e.version,
                comment: e.comment.clone(),
                applied: applied.contains(&e.version),
            })
            .collect();
        let missing = migrations
            .iter()
            .filter(|m| !m.applied && current.is_some_and(|c| m.version < c))
            .map(|m| m.version)
            .collect();

        Ok(Status {
            current,
            latest: entries.last().map(|e| e.version),
            snapshot: self.stored_snapshot()?.map(|s| s.version),
            migrations,
            missing,
        })
    }

    /// Fold the migration files up to `max_version` into a schema
    ///
    /// An initial file replaces the schema built so far; incremental files
    /// apply their up branch.
    pub fn schema_at(&self, max_version: Option<Version>) -> Result<Option<SchemaSnapshot>> {
        let mut folded: Option<(Version, SchemaDef)> = None;

        for entry in self.schema_versions()? {
            if max_version.is_some_and(|max| entry.version > max) {
                break;
            }
            let schema = match entry.load()? {
                MigrationFile::Initial { schema, .. } => schema,
                MigrationFile::Incremental(script) => {
                    let mut schema = folded.take().map(|(_, s)| s).unwrap_or_default();
                    let source = entry.path.display().to_string();
                    script.up.apply(&mut schema, &source)?;
                    schema
                }
            };
            folded = Some((entry.version, schema));
        }

        Ok(folded.map(|(version, schema)| SchemaSnapshot::new(version, schema)))
    }

    fn transaction<T>(
        &mut self,
        work: impl FnOnce(&mut Self) -> Result<Finish<T>>,
    ) -> Result<T> {
        self.driver.begin()?;
        match work(self) {
            Ok(Finish::Commit(value)) => {
                if let Err(err) = self.driver.commit() {
                    self.abandon();
                    return Err(err);
                }
                Ok(value)
            }
            Ok(Finish::Rollback(value)) => {
                self.driver.rollback()?;
                Ok(value)
            }
            Err(err) => {
                self.log.warn(format!("Rolling back: {}", err));
                self.abandon();
                Err(err)
            }
        }
    }

    /// Like `transaction`, but files staged by `work` are published only
    /// after the commit and discarded otherwise
    fn transaction_with_files<T>(
        &mut self,
        work: impl FnOnce(&mut Self, &mut StagedFiles) -> Result<Finish<T>>,
    ) -> Result<T> {
        let mut staged = StagedFiles::default();
        let mut commit = false;
        let result = self.transaction(|this| {
            let finish = work(this, &mut staged)?;
            commit = matches!(finish, Finish::Commit(_));
            Ok(finish)
        });
        match result {
            Ok(value) if commit => {
                staged.publish()?;
                Ok(value)
            }
            other => {
                staged.discard();
                other
            }
        }
    }

    fn abandon(&self) {
        if self.driver.in_transaction() {
            if let Err(err) = self.driver.rollback() {
                tracing::error!(error = %err, "rollback failed");
            }
        }
    }

    // ============================================
    // SNAPSHOT
    // ============================================

    /// Record the live schema as a new migration
    pub fn snapshot(&mut self, options: &SnapshotOptions) -> Result<SnapshotOutcome> {
        let latest = self.latest_version()?;
        if let Some(latest) = latest {
            let current = self.current_version()?;
            if current != Some(latest) {
                return Err(MigrateError::StaleDatabase { current, latest });
            }
        }
        if let (Some(version), Some(latest)) = (options.version, latest) {
            if version <= latest {
                return Err(MigrateError::InvalidVersion(format!(
                    "{} is not newer than the latest version {}",
                    version, latest
                )));
            }
        }

        self.log.info("Snapshot process starting");
        let outcome =
            self.transaction_with_files(|this, staged| this.take_snapshot(options, latest, staged))?;
        if let SnapshotOutcome::Written { version, path } = &outcome {
            self.log
                .info(format!("Migration file written to {}", path.display()));
            self.log.info(format!("Snapshot version {} recorded", version));
        }
        Ok(outcome)
    }

    fn take_snapshot(
        &mut self,
        options: &SnapshotOptions,
        latest: Option<Version>,
        staged: &mut StagedFiles,
    ) -> Result<Finish<SnapshotOutcome>> {
        if let Err(err) = self.driver.probe() {
            self.log.warn(format!(
                "There was a problem connecting to the database: {}",
                err
            ));
            return Ok(Finish::Rollback(SnapshotOutcome::Aborted(err.to_string())));
        }

        let stored = self.stored_snapshot()?;
        let initial = stored.is_none();
        if initial {
            self.log.info("This is an initial snapshot");
        }
        let default_comment = if initial {
            INITIAL_COMMENT
        } else {
            SNAPSHOT_COMMENT
        };
        let comment = options
            .comment
            .clone()
            .unwrap_or_else(|| default_comment.to_string());

        let live = describe(self.driver, &self.ignore)?;
        let script = diff_schemas(stored.as_ref().map(|s| &s.schema), &live, &options.renames)?;
        if script.is_empty() {
            self.log.info("No changes detected.");
            return Ok(Finish::Rollback(SnapshotOutcome::Unchanged));
        }

        for line in script.up.summary() {
            self.log.info(line);
        }
        if options.dry_run {
            self.log.info("Dry run, nothing written");
            return Ok(Finish::Rollback(SnapshotOutcome::DryRun(script)));
        }

        let version = match options.version {
            Some(version) => version,
            None => {
                let now = Version::now();
                match latest {
                    Some(latest) if now <= latest => latest.next(),
                    _ => now,
                }
            }
        };

        let path = self
            .config
            .migrate_dir_path()
            .join(file_name(version, &comment));
        let file = if initial {
            MigrationFile::Initial {
                version,
                schema: live.clone(),
            }
        } else {
            MigrationFile::Incremental(script)
        };
        staged.stage_migration(&file, path.clone())?;
        staged.stage_snapshot(
            &SchemaSnapshot::new(version, live),
            self.config.schema_file_path(),
        )?;

        let ledger = self.ledger();
        ledger.create_info_table()?;
        ledger.record(version)?;

        Ok(Finish::Commit(SnapshotOutcome::Written { version, path }))
    }

    /// Collapse the migration history into one initial file at the latest
    /// version
    pub fn checkpoint(&mut self, comment: Option<&str>) -> Result<Version> {
        let entries = self.schema_versions()?;
        let latest = entries.last().map(|e| e.version).ok_or(MigrateError::NoSchema)?;
        let current = self.current_version()?;
        if current != Some(latest) {
            return Err(MigrateError::StaleDatabase { current, latest });
        }
        let schema = self
            .schema_at(None)?
            .map(|s| s.schema)
            .ok_or(MigrateError::NoSchema)?;
        let comment = comment.unwrap_or(CHECKPOINT_COMMENT).to_string();

        let path = self
            .config
            .migrate_dir_path()
            .join(file_name(latest, &comment));

        self.log.info("Creating checkpoint");
        self.transaction_with_files(|this, staged| {
            let ledger = this.ledger();
            ledger.create_info_table()?;
            this.log.info("Truncating schema info table");
            ledger.clear()?;
            ledger.record(latest)?;

            for entry in &entries {
                staged.remove(entry.path.clone());
            }
            let file = MigrationFile::Initial {
                version: latest,
                schema: schema.clone(),
            };
            staged.stage_migration(&file, path.clone())?;
            staged.stage_snapshot(
                &SchemaSnapshot::new(latest, schema),
                this.config.schema_file_path(),
            )?;
            Ok(Finish::Commit(()))
        })?;

        self.log.info(format!("Checkpoint written to {}", path.display()));
        Ok(latest)
    }

    // ============================================
    // MIGRATE
    // ============================================

    /// Bring the database to `target` (default: the latest version)
    pub fn migrate(
        &mut self,
        target: Option<Version>,
        options: &MigrateOptions,
    ) -> Result<MigrateOutcome> {
        let entries = self.schema_versions()?;
        let snapshot = self.stored_snapshot()?;
        let snapshot_version = snapshot.as_ref().map(|s| s.version);

        let target = match target {
            Some(version) => {
                let known = entries.iter().any(|e| e.version == version)
                    || snapshot_version == Some(version);
                if !known {
                    return Err(MigrateError::UnknownVersion(version));
                }
                version
            }
            None => entries
                .last()
                .map(|e| e.version)
                .or(snapshot_version)
                .ok_or(MigrateError::NoSchema)?,
        };

        self.log.info(format!("Migrating to version '{}'", target));
        self.transaction(|this| {
            let outcome = this.migrate_to(target, &entries, snapshot.as_ref(), options)?;
            if options.dry_run {
                this.log.info("Dry run, rolling back");
                Ok(Finish::Rollback(outcome))
            } else {
                Ok(Finish::Commit(outcome))
            }
        })
    }

    fn migrate_to(
        &mut self,
        target: Version,
        entries: &[MigrationEntry],
        snapshot: Option<&SchemaSnapshot>,
        options: &MigrateOptions,
    ) -> Result<MigrateOutcome> {
        let ledger = self.ledger();
        let applied = ledger.applied_versions()?;

        let Some(current) = applied.last().copied() else {
            return match snapshot {
                Some(snapshot) if snapshot.version == target => {
                    self.initialise(snapshot, entries, options)
                }
                _ => Err(MigrateError::NoMigrationPath {
                    target,
                    snapshot: snapshot.map(|s| s.version),
                }),
            };
        };

        let missing: Vec<String> = entries
            .iter()
            .filter(|e| e.version < current && !applied.contains(&e.version))
            .map(|e| e.version.to_string())
            .collect();
        if !missing.is_empty() {
            self.log.warn(format!(
                "Versions older than {} have not been applied: {}",
                current,
                missing.join(", ")
            ));
        }

        if target == current {
            self.log.info(format!("Database is already at version {}", current));
            return Ok(MigrateOutcome::UpToDate(current));
        }

        let (direction, versions) = if target > current {
            let versions = entries
                .iter()
                .filter(|e| e.version > current && e.version <= target)
                .map(|e| e.version)
                .collect::<Vec<_>>();
            (Direction::Up, versions)
        } else {
            let versions = applied
                .iter()
                .rev()
                .filter(|v| **v > target && **v <= current)
                .copied()
                .collect::<Vec<_>>();
            (Direction::Down, versions)
        };

        // Parse every file before touching the database
        let mut plan = Vec::with_capacity(versions.len());
        for &version in &versions {
            let entry = entries
                .iter()
                .find(|e| e.version == version)
                .ok_or(MigrateError::MissingMigrationFile(version))?;
            plan.push((entry, player::changes_for(entry.load()?, version, direction)?));
        }

        for (entry, changes) in &plan {
            self.log.info(format!(
                "Replaying version '{}' ({}) {}",
                entry.version, entry.comment, direction
            ));
            player::replay(self.driver, changes, &mut self.log)?;
            match direction {
                Direction::Up => ledger.record(entry.version)?,
                Direction::Down => ledger.forget(entry.version)?,
            }
        }

        self.log.info(format!("Database is now at version {}", target));
        Ok(MigrateOutcome::Replayed {
            direction,
            versions,
        })
    }

    /// Create a fresh database straight from the snapshot
    fn initialise(
        &mut self,
        snapshot: &SchemaSnapshot,
        entries: &[MigrationEntry],
        options: &MigrateOptions,
    ) -> Result<MigrateOutcome> {
        let existing: Vec<QualifiedName> = self
            .driver
            .list_tables()?
            .into_iter()
            .filter(|t| !self.ignore.contains(t))
            .collect();

        if !existing.is_empty() {
            if !options.keep_tables {
                return Err(MigrateError::TablesExist(
                    existing.iter().map(|t| t.to_string()).collect(),
                ));
            }
            for table in &existing {
                if !self.matches_snapshot(table, &snapshot.schema)? {
                    return Err(MigrateError::TableMismatch(table.clone()));
                }
                self.log
                    .info(format!("Keeping existing table '{}'", table));
            }
        }

        self.log.info(format!(
            "Initialising database at version {}",
            snapshot.version
        ));
        let ledger = self.ledger();
        ledger.create_info_table()?;

        let mut changes = ChangeSet::creating(&snapshot.schema);
        changes.create.table.retain(|t| !existing.contains(&t.name));
        changes.create.index.retain(|i| !existing.contains(&i.table));
        player::replay(self.driver, &changes, &mut self.log)?;

        let mut versions: Vec<Version> = entries
            .iter()
            .map(|e| e.version)
            .filter(|v| *v <= snapshot.version)
            .collect();
        if !versions.contains(&snapshot.version) {
            versions.push(snapshot.version);
        }
        for version in versions {
            ledger.record(version)?;
        }

        Ok(MigrateOutcome::Initialised {
            version: snapshot.version,
        })
    }

    fn matches_snapshot(&self, table: &QualifiedName, schema: &SchemaDef) -> Result<bool> {
        let Some(expected) = schema.columns(table) else {
            return Ok(false);
        };
        let columns = self.driver.describe_table(table)?;

        let sorted = |indexes: &[IndexDescriptor]| {
            let mut indexes = indexes.to_vec();
            indexes.sort_by(|a, b| a.name.cmp(&b.name));
            indexes
        };
        let live_indexes = sorted(&self.driver.list_indexes(table)?);
        let expected_indexes = sorted(schema.indexes.get(table).map_or(&[][..], |v| v.as_slice()));

        Ok(same_columns(expected, &columns) && live_indexes == expected_indexes)
    }

    /// Run an applied version's down branch, then its up branch
    pub fn replay(&mut self, version: Version, dry_run: bool) -> Result<()> {
        let entries = self.schema_versions()?;
        let entry = entries
            .iter()
            .find(|e| e.version == version)
            .ok_or(MigrateError::UnknownVersion(version))?;
        if !self.ledger().is_applied(version)? {
            return Err(MigrateError::NotApplied(version));
        }

        let file = entry.load()?;
        let down = player::changes_for(file.clone(), version, Direction::Down)?;
        let up = player::changes_for(file, version, Direction::Up)?;

        self.log.info(format!("Replaying version '{}'", version));
        self.transaction(|this| {
            player::replay(this.driver, &down, &mut this.log)?;
            player::replay(this.driver, &up, &mut this.log)?;
            if dry_run {
                this.log.info("Dry run, rolling back");
                Ok(Finish::Rollback(()))
            } else {
                Ok(Finish::Commit(()))
            }
        })
    }

    /// Run the down branch of one applied version and forget it, leaving
    /// the versions around it in place
    ///
    /// Returns `false` when the version was never applied.
    pub fn rollback(&mut self, version: Version, dry_run: bool) -> Result<bool> {
        if !self.ledger().is_applied(version)? {
            self.log.info(format!(
                "Version {} has not been applied. Skipping rollback.",
                version
            ));
            return Ok(false);
        }

        let entries = self.schema_versions()?;
        let entry = entries
            .iter()
            .find(|e| e.version == version)
            .ok_or(MigrateError::MissingMigrationFile(version))?;
        let changes = player::changes_for(entry.load()?, version, Direction::Down)?;

        self.log.info(format!(
            "Rolling back version '{}' ({})",
            version, entry.comment
        ));
        self.transaction(|this| {
            player::replay(this.driver, &changes, &mut this.log)?;
            this.ledger().forget(version)?;
            if dry_run {
                this.log.info("Dry run, rolling back");
                Ok(Finish::Rollback(true))
            } else {
                this.log
                    .info(format!("Rollback of version {} completed", version));
                Ok(Finish::Commit(true))
            }
        })
    }

    /// Drop every view and table, then recreate an empty ledger
    ///
    /// Tables that fail to drop (foreign keys still pointing at them) are
    /// retried after the others; a pass that drops nothing gives up with the
    /// last error.
    pub fn delete_everything(&mut self) -> Result<Vec<QualifiedName>> {
        self.log.warn("Deleting all database objects!");
        self.transaction(|this| {
            let mut dropped = Vec::new();
            for view in this.driver.list_views()? {
                this.driver.drop_view(&view)?;
                this.log.info(format!("Dropped view '{}'", view));
                dropped.push(view);
            }

            let mut pending = this.driver.list_tables()?;
            while !pending.is_empty() {
                let attempted = pending.len();
                let mut blocked = Vec::new();
                let mut last_error = None;
                for table in pending {
                    match this.driver.drop_table(&table) {
                        Ok(()) => {
                            this.log.info(format!("Dropped table '{}'", table));
                            dropped.push(table);
                        }
                        Err(err) => {
                            tracing::debug!(table = %table, error = %err, "drop failed, retrying later");
                            blocked.push(table);
                            last_error = Some(err);
                        }
                    }
                }
                if let Some(err) = last_error.filter(|_| blocked.len() == attempted) {
                    this.log
                        .warn("Got stuck trying to resolve drop dependencies");
                    return Err(err);
                }
                pending = blocked;
            }

            this.ledger().create_info_table()?;
            Ok(Finish::Commit(dropped))
        })
    }
}
