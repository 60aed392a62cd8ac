//! Error type shared by the schema engine

use std::path::PathBuf;

use thiserror::Error;

use crate::schema::QualifiedName;
use crate::version::Version;

pub type Result<T, E = MigrateError> = std::result::Result<T, E>;

/// Errors raised while describing, diffing, writing or replaying schemas
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid migration file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("unable to read migration directory entry: {0}")]
    Glob(#[from] glob::GlobError),

    #[error(
        "snapshotting a database that is not at the latest schema version is not supported \
         (database: {}, latest: {latest})",
        format_version(.current)
    )]
    StaleDatabase {
        current: Option<Version>,
        latest: Version,
    },
    #[error("unable to find migration version '{0}'")]
    UnknownVersion(Version),
    #[error("this application has no schema file; database schema is not being managed")]
    NoSchema,
    #[error(
        "database has no schema version and '{target}' is not the snapshot version ({})",
        format_version(.snapshot)
    )]
    NoMigrationPath {
        target: Version,
        snapshot: Option<Version>,
    },
    #[error("tables exist in database but no schema info was found: {}", .0.join(", "))]
    TablesExist(Vec<String>),
    #[error("table '{0}' already exists but is different")]
    TableMismatch(QualifiedName),
    #[error("I don't know how to {action} {entity}s")]
    UnsupportedOperation { action: String, entity: String },
    #[error("malformed migration {source_name}: {reason}")]
    MalformedMigration { source_name: String, reason: String },
    #[error("version {version} can not be reverted: {reason}")]
    Irreversible { version: Version, reason: String },
    #[error("table '{table}' matches several renamed candidates: {}", format_names(.candidates))]
    AmbiguousRename {
        table: QualifiedName,
        candidates: Vec<QualifiedName>,
    },
    #[error("rename '{from}' -> '{to}' does not match a removed and a created table")]
    InvalidRename {
        from: QualifiedName,
        to: QualifiedName,
    },
    #[error("invalid version '{0}'")]
    InvalidVersion(String),
    #[error("invalid name '{0}'")]
    InvalidName(String),
    #[error("two migration files share version {version}: {}", .path.display())]
    DuplicateVersion { version: Version, path: PathBuf },
    #[error("version {0} is applied but its migration file is missing")]
    MissingMigrationFile(Version),
    #[error("version {0} is not an applied migration")]
    NotApplied(Version),
    #[error("unsupported by driver: {0}")]
    Unsupported(String),
}

impl MigrateError {
    pub(crate) fn malformed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        MigrateError::MalformedMigration {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

fn format_names(names: &[QualifiedName]) -> String {
    names
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_version(version: &Option<Version>) -> String {
    match version {
        Some(v) => v.to_string(),
        None => "none".to_string(),
    }
}
