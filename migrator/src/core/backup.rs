use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::core::client::database::repository::VersionRepository;
use crate::core::client::database::{DatabaseError, MigrationStore};
use crate::types::version_record::{now, BackupDescriptor, SchemaVersion};

/// Snapshot names tried before giving up on a name collision
const MAX_NAME_ATTEMPTS: u32 = 10;

/// Takes and restores full-store snapshots on behalf of the lock holder
#[derive(Clone)]
pub struct BackupCoordinator {
    versions: VersionRepository,
}

impl BackupCoordinator {
    pub fn new(versions: VersionRepository) -> Self {
        Self { versions }
    }

    fn store(&self) -> &Arc<dyn MigrationStore> {
        self.versions.store()
    }

    /// Make sure a snapshot of the store at `current_version` exists and is recorded.
    ///
    /// A descriptor left by a crashed attempt at the same version is reused as
    /// is. A descriptor taken at another version belongs to an earlier step and
    /// is superseded by a fresh snapshot.
    #[instrument(skip(self))]
    pub async fn ensure_backup(&self, current_version: SchemaVersion) -> Result<BackupDescriptor, DatabaseError> {
        let existing = self.versions.get().await?.and_then(|record| record.backup);
        if let Some(backup) = existing.filter(|backup| backup.version == current_version) {
            info!(backup = %backup.name, taken_at = %backup.taken_at, "Backup already exists, reusing it");
            return Ok(backup);
        }

        let taken_at = now();
        let mut stamp = taken_at.timestamp_millis();
        let mut attempt = 0;
        let name = loop {
            let name = format!("{}_{}", self.store().name(), stamp);
            match self.store().snapshot(&name).await {
                Ok(()) => break name,
                Err(DatabaseError::SnapshotExists(_)) if attempt < MAX_NAME_ATTEMPTS => {
                    debug!(backup = %name, "Backup name already taken");
                    attempt += 1;
                    stamp += 1;
                }
                Err(e) => return Err(e),
            }
        };

        // the snapshot's own copy of the record must not look locked once restored or inspected
        VersionRepository::new(self.store().sibling(&name), self.versions.collection()).clear_upgrading().await?;

        let backup = BackupDescriptor { name, version: current_version, taken_at };
        self.versions.set_backup(&backup).await?;
        info!(backup = %backup.name, "Created backup before starting migration");
        Ok(backup)
    }

    /// Drop the live data and replace it with the snapshot. The control collection is left untouched.
    #[instrument(skip(self), fields(backup = %backup.name))]
    pub async fn restore(&self, backup: &BackupDescriptor) -> Result<(), DatabaseError> {
        info!("Restoring database backup");
        self.store().restore(&backup.name, self.versions.collection()).await
    }
}
