//! Configuration builder that implements the hierarchy: CLI > ENV > Config File > Defaults

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use super::{MigratorConfig, MigratorConfigVersioned};
use crate::cli::database::mongodb::MongoDBCliArgs;
use crate::cli::MigrationCliArgs;

/// Configuration builder that merges config from multiple sources
#[derive(Default)]
pub struct ConfigBuilder {
    config: MigratorConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from a file path
    pub fn with_config_file(mut self, path: &Path) -> Result<Self> {
        info!("Loading configuration from file: {}", path.display());
        self.config = MigratorConfigVersioned::from_yaml_file(path)?.into_canonical();
        Ok(self)
    }

    /// Apply CLI overrides on top of the base config.
    ///
    /// Environment variables are resolved by clap, so an argument that is set
    /// here came from the command line or the environment.
    pub fn with_cli_overrides(mut self, mongodb: &MongoDBCliArgs, migration: &MigrationCliArgs) -> Self {
        let config = &mut self.config;

        if let Some(url) = &mongodb.mongodb_connection_url {
            debug!("Overriding database.connection_url from CLI");
            config.database.connection_url = url.clone();
        }
        if let Some(name) = &mongodb.mongodb_database_name {
            debug!("Overriding database.database_name from CLI: {}", name);
            config.database.database_name = name.clone();
        }

        if let Some(attempts) = migration.max_acquire_attempts {
            debug!("Overriding migration.max_acquire_attempts from CLI: {}", attempts);
            config.migration.max_acquire_attempts = attempts;
        }
        if let Some(retries) = migration.contention_retries {
            debug!("Overriding migration.contention_retries from CLI: {}", retries);
            config.migration.contention_retries = retries;
        }
        if let Some(baseline) = migration.baseline_version {
            debug!("Overriding migration.baseline_version from CLI: {}", baseline);
            config.migration.baseline_version = Some(baseline);
        }

        self
    }

    /// Build and validate the final configuration
    pub fn build(self) -> Result<MigratorConfig> {
        let config = self.config;

        if !config.database.connection_url.starts_with("mongodb://")
            && !config.database.connection_url.starts_with("mongodb+srv://")
        {
            anyhow::bail!("Invalid MongoDB connection url: expected a mongodb:// or mongodb+srv:// scheme");
        }
        if config.database.database_name.is_empty() {
            anyhow::bail!("Database name must not be empty");
        }
        if config.migration.control_collection.is_empty() {
            anyhow::bail!("Control collection name must not be empty");
        }
        if config.migration.max_acquire_attempts == 0 {
            anyhow::bail!("migration.max_acquire_attempts must be at least 1");
        }

        Ok(config)
    }
}

/// Resolve the configuration for one CLI invocation
pub fn load_config(config_file: Option<&Path>, mongodb: &MongoDBCliArgs, migration: &MigrationCliArgs) -> Result<MigratorConfig> {
    let builder = match config_file {
        Some(path) => ConfigBuilder::new().with_config_file(path)?,
        None => ConfigBuilder::new(),
    };
    builder.with_cli_overrides(mongodb, migration).build().context("Invalid configuration")
}
