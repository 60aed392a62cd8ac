pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod manager;
pub mod schema;
pub mod version;

pub use config::Config;
pub use driver::{ConnectionRegistry, SchemaDriver, SqliteDriver};
pub use error::{MigrateError, Result};
pub use manager::{MigrateOptions, MigrateOutcome, SchemaManager, SnapshotOptions, SnapshotOutcome};
pub use schema::{SchemaDef, SchemaSnapshot};
pub use version::Version;
