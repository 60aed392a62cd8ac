//! Configuration management with YAML support

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub manager: ManagerConfig,
}

/// Database connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

/// Schema manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Directory holding the snapshot file and the migration directory
    #[serde(default = "default_db_dir")]
    pub db_dir: String,

    #[serde(default = "default_schema_file")]
    pub schema_file: String,

    /// Migration directory, relative to `db_dir`
    #[serde(default = "default_migrate_dir")]
    pub migrate_dir: String,

    /// Version ledger table; unqualified names go to the driver's default schema
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,

    /// Tables the describer never reports
    #[serde(default)]
    pub ignore_tables: Vec<String>,
}

// Default value functions
fn default_database_path() -> String {
    "db/database.sqlite".to_string()
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_db_dir() -> String {
    "db".to_string()
}

fn default_schema_file() -> String {
    "schema.json".to_string()
}

fn default_migrate_dir() -> String {
    "migrate".to_string()
}

fn default_ledger_table() -> String {
    "schema_info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            db_dir: default_db_dir(),
            schema_file: default_schema_file(),
            migrate_dir: default_migrate_dir(),
            ledger_table: default_ledger_table(),
            ignore_tables: Vec::new(),
        }
    }
}

impl ManagerConfig {
    /// Config rooted at an explicit db directory
    pub fn with_db_dir(db_dir: &Path) -> Self {
        Self {
            db_dir: db_dir.to_string_lossy().to_string(),
            ..Self::default()
        }
    }

    pub fn db_dir_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_dir).to_string())
    }

    pub fn schema_file_path(&self) -> PathBuf {
        self.db_dir_path().join(&self.schema_file)
    }

    pub fn migrate_dir_path(&self) -> PathBuf {
        self.db_dir_path().join(&self.migrate_dir)
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./schemata.yaml (current directory)
    /// 3. ~/.config/schemata/schemata.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "schemata.yaml".to_string(),
            shellexpand::tilde("~/.config/schemata/schemata.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if Path::new(search_path).exists() {
                return Self::read(Path::new(search_path));
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Load configuration for an application directory
    ///
    /// A relative config path is looked up under `app_path` before the
    /// usual search order. Relative paths inside the file resolve against
    /// `app_path`.
    pub fn load_for_app(path: &str, app_path: &Path) -> Result<Self> {
        let local = resolve(app_path, path);
        let config = if local.exists() {
            Self::read(&local)?
        } else {
            Self::load(path)?
        };
        Ok(config.rooted_at(app_path))
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Resolve relative paths against the application directory
    pub fn rooted_at(mut self, app_path: &Path) -> Self {
        self.database.path = resolve(app_path, &self.database.path)
            .to_string_lossy()
            .to_string();
        self.manager.db_dir = resolve(app_path, &self.manager.db_dir)
            .to_string_lossy()
            .to_string();
        self
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }
}

fn resolve(base: &Path, path: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(path).to_string());
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}
