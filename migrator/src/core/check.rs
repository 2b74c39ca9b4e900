use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::core::client::database::repository::VersionRepository;
use crate::core::client::database::{DatabaseError, MigrationStore};
use crate::types::version_record::{now, HistoryEntry, HistoryOutcome, SchemaVersion, VersionRecord};

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Refusing to run with tainted database")]
    Tainted,

    #[error("Refusing to start while database-upgrade is in progress (version {0})")]
    Upgrading(SchemaVersion),

    #[error("Found incompatible db-version {found}, expected: {expected}")]
    VersionMismatch { expected: SchemaVersion, found: SchemaVersion },

    #[error("No version record found")]
    NotInitialized,

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

impl CheckError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CheckError::Tainted => 3,
            CheckError::Upgrading(_) => 2,
            CheckError::VersionMismatch { expected, found } if found < expected => 4,
            _ => 1,
        }
    }
}

/// Start-up gate: is the store at the version the application was built for?
pub struct CompatibilityCheck {
    versions: VersionRepository,
}

impl CompatibilityCheck {
    pub fn new(store: Arc<dyn MigrationStore>, control_collection: &str) -> Self {
        Self { versions: VersionRepository::new(store, control_collection) }
    }

    /// Verify the version record. An absent record is created at `expected` when `initialize` is set.
    pub async fn check(&self, expected: SchemaVersion, initialize: bool) -> Result<VersionRecord, CheckError> {
        let record = match self.versions.get().await? {
            Some(record) => record,
            None if initialize => {
                info!(version = expected, "No version record found, creating new entry");
                let entry = HistoryEntry::new(expected, expected, now(), HistoryOutcome::Initialized, "initialized");
                if !self.versions.initialize(expected, &entry).await? {
                    info!("Version record was created concurrently");
                }
                self.versions.get().await?.ok_or(CheckError::NotInitialized)?
            }
            None => return Err(CheckError::NotInitialized),
        };

        if record.is_tainted {
            error!(version = record.version, "Refusing to start with tainted database");
            return Err(CheckError::Tainted);
        }
        if record.is_upgrading {
            error!(version = record.version, "Refusing to start while database-upgrade is in progress");
            return Err(CheckError::Upgrading(record.version));
        }
        if record.version != expected {
            error!(expected, found = record.version, "Database has wrong version");
            return Err(CheckError::VersionMismatch { expected, found: record.version });
        }

        info!(version = record.version, "Connected to database");
        Ok(record)
    }
}
