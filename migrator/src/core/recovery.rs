use tracing::{error, info, instrument, warn};

use crate::core::backup::BackupCoordinator;
use crate::core::client::database::repository::VersionRepository;
use crate::core::client::database::DatabaseError;
use crate::core::step::StepOutcome;
use crate::types::version_record::{BackupDescriptor, HistoryEntry, HistoryOutcome, SchemaVersion};

/// Terminal state of a recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Live data equals the backup; the store is still tainted for operator review
    Restored { backup: String, detail: String },
    /// No backup or the restore failed; live data is undefined
    Tainted { detail: String },
}

/// Handles a failed step: taint, roll back, record
pub struct RecoveryController {
    versions: VersionRepository,
    backups: BackupCoordinator,
}

impl RecoveryController {
    pub fn new(versions: VersionRepository, backups: BackupCoordinator) -> Self {
        Self { versions, backups }
    }

    /// Recover from a failed step `from -> to`.
    ///
    /// The taint is persisted before the restore starts and is never cleared here.
    /// A failure to persist it does not stop the restore or the history entry;
    /// it is returned once both were attempted.
    #[instrument(skip(self, backup, failure), fields(backup = backup.map(|b| b.name.as_str())))]
    pub async fn recover(
        &self,
        from: SchemaVersion,
        to: SchemaVersion,
        backup: Option<&BackupDescriptor>,
        failure: &StepOutcome,
    ) -> Result<Recovery, DatabaseError> {
        let taint = self.versions.mark_tainted().await;
        match &taint {
            Ok(()) => warn!("Database marked as tainted"),
            Err(e) => error!(error = %e, "Marking the database as tainted failed, restoring anyway"),
        }

        let recovery = match backup {
            Some(backup) => match self.backups.restore(backup).await {
                Ok(()) => {
                    info!(backup = %backup.name, "Restored database backup");
                    Recovery::Restored { backup: backup.name.clone(), detail: failure.detail.clone() }
                }
                Err(e) => {
                    error!(error = %e, "Restoring database backup failed, live data must not be trusted");
                    Recovery::Tainted { detail: format!("{}; restore of {} failed: {}", failure.detail, backup.name, e) }
                }
            },
            None => {
                error!("No backup recorded, cannot restore");
                Recovery::Tainted { detail: format!("{}; no backup to restore", failure.detail) }
            }
        };

        let (outcome, detail) = match &recovery {
            Recovery::Restored { detail, .. } => (HistoryOutcome::Restored, detail.clone()),
            Recovery::Tainted { detail } => (HistoryOutcome::RestoreFailed, detail.clone()),
        };
        let history = self.versions.append_history(&HistoryEntry::new(from, to, failure.started_at, outcome, detail)).await;
        taint?;
        history?;
        Ok(recovery)
    }
}
