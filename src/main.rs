use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use schemata::cli::{checkpoint, delete, migrate, replay, rollback, schema, snapshot, status};
use schemata::config::Config;
use schemata::driver::ConnectionRegistry;
use schemata::manager::SchemaManager;
use schemata::version::Version;

#[derive(Parser)]
#[command(name = "schemata")]
#[command(about = "Database schema snapshot, diff and migration tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "schemata.yaml")]
    config: String,

    /// Application directory that relative paths resolve against
    #[arg(short = 'p', long)]
    app_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record the live schema as a new migration
    Snapshot {
        /// Migration comment, used in the file name
        #[arg(short = 'm', long)]
        comment: Option<String>,

        /// Show what would change without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Confirm a table rename (schema.from=schema.to)
        #[arg(long = "rename", value_parser = snapshot::parse_rename)]
        renames: Vec<(String, String)>,

        /// Version to write instead of the current time
        #[arg(long)]
        version: Option<Version>,
    },

    /// Migrate the database to a version (default: latest)
    Migrate {
        version: Option<Version>,

        /// Replay everything, then roll back
        #[arg(long)]
        dry_run: bool,

        /// Accept existing tables that match the snapshot
        #[arg(long)]
        keep_tables: bool,
    },

    /// Run an applied version down, then up again
    Replay {
        version: Version,

        #[arg(long)]
        dry_run: bool,
    },

    /// Run the down branch of one applied version, wherever it sits
    Rollback {
        version: Version,

        #[arg(long)]
        dry_run: bool,
    },

    /// Show current, latest and applied versions
    Status,

    /// Print the schema folded from the migration files
    Schema {
        /// Stop at this version
        #[arg(long)]
        at: Option<Version>,
    },

    /// Collapse the migration history into one file
    Checkpoint {
        #[arg(short = 'm', long)]
        comment: Option<String>,
    },

    /// Drop every table and view, leaving an empty version ledger
    DeleteEverything {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    // Load config
    let app_path = match cli.app_path {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to determine working directory")?,
    };
    let config = Config::load_for_app(&cli.config, &app_path)
        .with_context(|| format!("Failed to load config {}", cli.config))?;

    // Open database
    let mut registry = ConnectionRegistry::new();
    let driver = registry
        .get_or_open(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database_path().display()))?;

    let mut manager = SchemaManager::new(driver, config.manager.clone())?;

    match cli.command {
        Commands::Snapshot {
            comment,
            dry_run,
            renames,
            version,
        } => {
            snapshot::run(&mut manager, comment, dry_run, renames, version)?;
        }
        Commands::Migrate {
            version,
            dry_run,
            keep_tables,
        } => {
            migrate::run(&mut manager, version, dry_run, keep_tables)?;
        }
        Commands::Replay { version, dry_run } => {
            replay::run(&mut manager, version, dry_run)?;
        }
        Commands::Rollback { version, dry_run } => {
            rollback::run(&mut manager, version, dry_run)?;
        }
        Commands::Status => {
            status::run(&manager)?;
        }
        Commands::Schema { at } => {
            schema::run(&manager, at)?;
        }
        Commands::Checkpoint { comment } => {
            checkpoint::run(&mut manager, comment)?;
        }
        Commands::DeleteEverything { yes } => {
            delete::run(&mut manager, yes)?;
        }
    }

    Ok(())
}
