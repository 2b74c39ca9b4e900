pub mod builder;
pub mod env_interpolation;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::params::{DatabaseArgs, MigrationSettings};
pub use builder::ConfigBuilder;

/// Versioned configuration wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "config_version")]
pub enum MigratorConfigVersioned {
    #[serde(rename = "1")]
    V1(MigratorConfigV1),
}

impl MigratorConfigVersioned {
    /// Load configuration from a YAML file, interpolating `${VAR}` references first
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let content = env_interpolation::interpolate_yaml_content(&content)
            .with_context(|| format!("Failed to interpolate config file: {}", path.display()))?;

        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let yaml_value: serde_yaml::Value = serde_yaml::from_str(content).context("Failed to parse YAML")?;

        if yaml_value.get("config_version").is_none() {
            anyhow::bail!(
                "Missing required field 'config_version' in config file. \
                 Current supported version: 1"
            );
        }

        let versioned: MigratorConfigVersioned = serde_yaml::from_str(content).context("Failed to deserialize config")?;
        Ok(versioned)
    }

    /// Convert to the canonical (latest) config format
    pub fn into_canonical(self) -> MigratorConfig {
        match self {
            MigratorConfigVersioned::V1(v1) => v1,
        }
    }
}

/// Canonical configuration (always latest version internally)
pub type MigratorConfig = MigratorConfigV1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratorConfigV1 {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub migration: MigrationSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connection_url: String,
    pub database_name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let defaults = DatabaseArgs::default();
        Self { connection_url: defaults.connection_uri, database_name: defaults.database_name }
    }
}

impl From<&DatabaseConfig> for DatabaseArgs {
    fn from(config: &DatabaseConfig) -> Self {
        Self { connection_uri: config.connection_url.clone(), database_name: config.database_name.clone() }
    }
}
