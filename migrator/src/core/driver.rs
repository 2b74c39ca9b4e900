use opentelemetry::KeyValue;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::core::backup::BackupCoordinator;
use crate::core::client::database::repository::VersionRepository;
use crate::core::client::database::MigrationStore;
use crate::core::client::lock::error::LockError;
use crate::core::client::lock::{LockManager, UpgradeLock};
use crate::core::recovery::{Recovery, RecoveryController};
use crate::core::step::{MigrationStep, StepRunner};
use crate::error::{MigratorError, MigratorResult};
use crate::types::params::MigrationSettings;
use crate::migrations::BASELINE_VERSION;
use crate::types::version_record::{now, HistoryEntry, HistoryOutcome, SchemaVersion};
use crate::types::RunOutcome;
use crate::utils::metrics::MIGRATOR_METRICS;

/// Single-attempt control loop for one migration step
///
/// Every call re-reads the version record; the driver keeps no state between
/// invocations and may be shared by any number of concurrent runs.
pub struct MigrationDriver {
    versions: VersionRepository,
    locks: LockManager,
    backups: BackupCoordinator,
    runner: StepRunner,
    recovery: RecoveryController,
    settings: MigrationSettings,
}

impl MigrationDriver {
    pub fn new(store: Arc<dyn MigrationStore>, settings: MigrationSettings) -> Self {
        let versions = VersionRepository::new(store.clone(), settings.control_collection.clone());
        let backups = BackupCoordinator::new(versions.clone());
        Self {
            locks: LockManager::new(versions.clone()),
            recovery: RecoveryController::new(versions.clone(), backups.clone()),
            runner: StepRunner::new(store),
            backups,
            versions,
            settings,
        }
    }

    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    /// Version an absent record is read as
    pub fn baseline(&self) -> SchemaVersion {
        self.settings.baseline_version.unwrap_or(BASELINE_VERSION)
    }

    /// Run `step` if and only if the store is exactly at its source version.
    #[instrument(skip_all, fields(step = %format!("{}->{}", step.from_version(), step.to_version())))]
    pub async fn run_step(&self, step: &dyn MigrationStep) -> MigratorResult<RunOutcome> {
        let result = self.attempt(step).await;
        let label = match &result {
            Ok(outcome) => {
                if outcome.is_success() {
                    info!(outcome = outcome.label(), "{}", outcome);
                } else {
                    warn!(outcome = outcome.label(), "{}", outcome);
                }
                outcome.label()
            }
            Err(e) => {
                error!(error = %e, "Migration run failed");
                "error"
            }
        };
        MIGRATOR_METRICS.migration_runs.add(1, &[KeyValue::new("outcome", label)]);
        result
    }

    async fn attempt(&self, step: &dyn MigrationStep) -> MigratorResult<RunOutcome> {
        let from = step.from_version();
        let attempts = self.settings.max_acquire_attempts.max(1);

        for attempt in 1..=attempts {
            let record = self.versions.get().await?;
            let (version, is_upgrading, is_tainted) = match &record {
                Some(record) => (record.version, record.is_upgrading, record.is_tainted),
                None => (self.baseline(), false, false),
            };

            if is_tainted {
                return Ok(RunOutcome::Tainted);
            }
            if version > from {
                return Ok(RunOutcome::AlreadyMigrated { found: version });
            }
            if version < from {
                return Ok(RunOutcome::Behind { expected: from, found: version });
            }
            if is_upgrading {
                return Ok(RunOutcome::Contended { version });
            }

            match self.locks.try_acquire(from).await? {
                Some(lock) => return self.locked_section(step, lock).await,
                None if attempt < attempts => {
                    let backoff = self.settings.acquire_backoff(attempt);
                    debug!(attempt, backoff_ms = backoff.as_millis() as u64, "Lock acquisition lost, re-reading version record");
                    tokio::time::sleep(backoff).await;
                }
                None => {}
            }
        }
        Ok(RunOutcome::Contended { version: from })
    }

    /// Everything that happens while the lock is held. The lock is given back on every path.
    async fn locked_section(&self, step: &dyn MigrationStep, lock: UpgradeLock) -> MigratorResult<RunOutcome> {
        let result = self.migrate(step).await;

        if let Err(MigratorError::LockError(LockError::LockLost(_))) = &result {
            lock.forfeit();
            return result;
        }

        match (result, lock.release().await) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(outcome), Err(release)) => {
                error!(outcome = outcome.label(), error = %release, "Releasing the upgrade lock failed, manual unlock required");
                Err(release.into())
            }
            (Err(run), Ok(())) => Err(run),
            (Err(run), Err(release)) => Err(MigratorError::RunAndReleaseFailed { run: Box::new(run), release }),
        }
    }

    async fn migrate(&self, step: &dyn MigrationStep) -> MigratorResult<RunOutcome> {
        let (from, to) = (step.from_version(), step.to_version());
        let started_at = now();

        let backup = match self.backups.ensure_backup(from).await {
            Ok(backup) => backup,
            Err(e) => {
                error!(error = %e, "Backup failed, aborting migration");
                let detail = e.to_string();
                let entry = HistoryEntry::new(from, to, started_at, HistoryOutcome::BackupFailed, detail.clone());
                self.versions.append_history(&entry).await?;
                return Ok(RunOutcome::BackupFailed { detail });
            }
        };

        let outcome = self.runner.run(step).await;
        if outcome.success {
            let mut entry = HistoryEntry::new(from, to, outcome.started_at, HistoryOutcome::Success, outcome.detail);
            entry.completed_at = outcome.completed_at;
            if !self.versions.commit_version(from, to, &entry).await? {
                error!("Upgrade lock was released while the step ran, version not committed");
                let detail = format!("{}; upgrade lock lost before the version was committed", entry.detail);
                let lost = HistoryEntry::new(from, to, outcome.started_at, HistoryOutcome::LockLost, detail);
                if let Err(e) = self.versions.append_history(&lost).await {
                    error!(error = %e, "Recording the lost upgrade lock failed");
                }
                return Err(LockError::LockLost(from).into());
            }
            return Ok(RunOutcome::Migrated { from, to });
        }

        match self.recovery.recover(from, to, Some(&backup), &outcome).await? {
            Recovery::Restored { backup, detail } => Ok(RunOutcome::Restored { detail, backup }),
            Recovery::Tainted { detail } => Ok(RunOutcome::RestoreFailed { detail }),
        }
    }
}
