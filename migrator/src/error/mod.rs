use thiserror::Error;

use crate::core::check::CheckError;
use crate::core::client::database::DatabaseError;
use crate::core::client::lock::error::LockError;
use crate::core::operator::OperatorError;
use crate::migrations::RegistryError;

/// Result type for migrator operations
pub type MigratorResult<T> = Result<T, MigratorError>;

/// Error types for the migrator
#[derive(Error, Debug)]
pub enum MigratorError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Lock error: {0}")]
    LockError(#[from] LockError),

    #[error("Registry error: {0}")]
    RegistryError(#[from] RegistryError),

    #[error("Compatibility check failed: {0}")]
    CheckError(#[from] CheckError),

    #[error("Operator command failed: {0}")]
    OperatorError(#[from] OperatorError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Migrator Error: {0}")]
    MigratorAnyHowError(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Both the run and the release of the upgrade lock failed
    #[error("{run}; additionally releasing the upgrade lock failed: {release}")]
    RunAndReleaseFailed { run: Box<MigratorError>, release: LockError },
}

impl MigratorError {
    /// Exit status for a command that ended in an error instead of an outcome
    pub fn exit_code(&self) -> u8 {
        1
    }
}
