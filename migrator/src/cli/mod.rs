use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::types::version_record::SchemaVersion;
use database::mongodb::MongoDBCliArgs;

pub mod database;

#[derive(Parser, Debug)]
#[command(
    name = "migrator",
    version,
    about = "Crash-safe, lock-coordinated schema migrations for the Smarti MongoDB store",
    after_help = "Exit codes:\n  \
    0 success or nothing to do\n  \
    1 error\n  \
    2 upgrade in progress (contended)\n  \
    3 database tainted\n  \
    4 database version behind\n  \
    5 backup failed\n  \
    6 migration failed, backup restored, database tainted\n  \
    7 migration failed, restore failed, database tainted"
)]
pub struct Cli {
    /// YAML config file (config_version: "1")
    #[arg(env = "MIGRATOR_CONFIG_FILE", long, global = true)]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub mongodb_args: MongoDBCliArgs,

    #[command(flatten)]
    pub migration_args: MigrationCliArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides of the migration settings
#[derive(Debug, Clone, Default, Args)]
pub struct MigrationCliArgs {
    /// Lock acquisition attempts per step.
    #[arg(env = "MIGRATOR_MAX_ACQUIRE_ATTEMPTS", long, global = true)]
    pub max_acquire_attempts: Option<u32>,

    /// How often a contended step is retried with --wait-on-contention.
    #[arg(env = "MIGRATOR_CONTENTION_RETRIES", long, global = true)]
    pub contention_retries: Option<u32>,

    /// Version a database without version record is treated as.
    #[arg(env = "MIGRATOR_BASELINE_VERSION", long, global = true)]
    pub baseline_version: Option<SchemaVersion>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every pending migration step in order
    Migrate {
        /// Stop once the database reached this version
        #[arg(long)]
        target_version: Option<SchemaVersion>,

        /// Wait for a running upgrade instead of giving up
        #[arg(long)]
        wait_on_contention: bool,
    },
    /// Run exactly one registered migration step
    RunStep {
        /// Source version of the step
        #[arg(long)]
        from: SchemaVersion,
    },
    /// Print the version record as JSON
    Status,
    /// Verify the database is at the expected version
    Check {
        #[arg(long)]
        expected_version: SchemaVersion,

        /// Create the version record of an empty database at the expected version
        #[arg(long)]
        initialize: bool,
    },
    /// Clear the taint flag after manual inspection
    ClearTaint,
    /// Release an upgrade lock left behind by a crashed run
    Unlock,
    /// Remove the backup reference from the version record; the backup database is kept
    ForgetBackup,
}
