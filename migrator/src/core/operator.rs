use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::client::database::repository::VersionRepository;
use crate::core::client::database::{DatabaseError, MigrationStore};
use crate::core::client::lock::error::LockError;
use crate::core::client::lock::LockManager;
use crate::types::version_record::{BackupDescriptor, VersionRecord};

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("No version record found")]
    NoVersionRecord,

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Lock error: {0}")]
    LockError(#[from] LockError),
}

/// Manual interventions after a partial failure
///
/// None of these commands are used by automated runs. The backup data itself
/// is never deleted; [`OperatorCommands::forget_backup`] only drops the reference.
pub struct OperatorCommands {
    versions: VersionRepository,
}

impl OperatorCommands {
    pub fn new(store: Arc<dyn MigrationStore>, control_collection: &str) -> Self {
        Self { versions: VersionRepository::new(store, control_collection) }
    }

    pub async fn status(&self) -> Result<Option<VersionRecord>, OperatorError> {
        Ok(self.versions.get().await?)
    }

    /// Returns true if the store was tainted.
    pub async fn clear_taint(&self) -> Result<bool, OperatorError> {
        let record = self.versions.get().await?.ok_or(OperatorError::NoVersionRecord)?;
        if record.is_upgrading {
            warn!(version = record.version, "Clearing taint while an upgrade lock is held");
        }
        let cleared = self.versions.clear_taint().await?;
        if cleared {
            info!(version = record.version, "Taint cleared by operator");
        }
        Ok(cleared)
    }

    /// Release a lock left behind by a crashed run. Returns true if the store was locked.
    pub async fn force_unlock(&self) -> Result<bool, OperatorError> {
        self.versions.get().await?.ok_or(OperatorError::NoVersionRecord)?;
        Ok(LockManager::new(self.versions.clone()).release().await?)
    }

    /// Drop the backup reference and return what it pointed at.
    pub async fn forget_backup(&self) -> Result<Option<BackupDescriptor>, OperatorError> {
        let record = self.versions.get().await?.ok_or(OperatorError::NoVersionRecord)?;
        let Some(backup) = record.backup else {
            return Ok(None);
        };
        if self.versions.unset_backup().await? {
            info!(backup = %backup.name, taken_at = %backup.taken_at, version = backup.version, "Removed backup reference, the backup database is kept");
        }
        Ok(Some(backup))
    }
}
