pub mod error;

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::client::database::repository::VersionRepository;
use crate::types::version_record::SchemaVersion;
use error::LockError;

/// Exclusive upgrade lock on the version record
///
/// The lock is the `isUpgrading` flag of the version record. It carries no
/// owner and no expiry: a holder that dies leaves the flag set until an
/// operator clears it.
#[derive(Clone)]
pub struct LockManager {
    versions: VersionRepository,
}

impl LockManager {
    pub fn new(versions: VersionRepository) -> Self {
        Self { versions }
    }

    /// Try to take the lock for a store at `expected_version`.
    ///
    /// `None` means the conditional write matched nothing: the caller has to
    /// re-read the record to tell a stale attempt, a contended lock and a
    /// tainted store apart.
    pub async fn try_acquire(&self, expected_version: SchemaVersion) -> Result<Option<UpgradeLock>, LockError> {
        if self.versions.try_mark_upgrading(expected_version).await? {
            info!(version = expected_version, "Upgrade lock acquired");
            Ok(Some(UpgradeLock { manager: Arc::new(self.clone()), version: expected_version, released: false }))
        } else {
            debug!(version = expected_version, "Could not acquire upgrade lock");
            Ok(None)
        }
    }

    /// Unconditionally release the lock, whoever holds it.
    pub async fn release(&self) -> Result<bool, LockError> {
        let was_locked = self.versions.clear_upgrading().await?;
        if was_locked {
            info!("Upgrade lock released");
        } else {
            warn!("Released upgrade lock that was not held");
        }
        Ok(was_locked)
    }
}

/// A held upgrade lock
///
/// Must be given back with [`UpgradeLock::release`]. Dropping it unreleased
/// (the owning future was cancelled or unwound) schedules the release on the
/// current tokio runtime.
#[must_use = "an unreleased upgrade lock blocks every future migration run"]
pub struct UpgradeLock {
    manager: Arc<LockManager>,
    version: SchemaVersion,
    released: bool,
}

impl UpgradeLock {
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub async fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.manager.release().await.map(|_| ())
    }

    /// Give up the guard without touching the record, for a lock that is no longer ours.
    pub fn forfeit(mut self) {
        self.released = true;
        warn!(version = self.version, "Upgrade lock was lost, not releasing it");
    }
}

impl Drop for UpgradeLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        error!(version = self.version, "Upgrade lock dropped without release, releasing in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = self.manager.clone();
                let version = self.version;
                handle.spawn(async move {
                    if let Err(e) = manager.release().await {
                        error!(version, error = %e, "Background release of upgrade lock failed, manual unlock required");
                    }
                });
            }
            Err(_) => {
                error!(version = self.version, "No runtime to release upgrade lock, manual unlock required");
            }
        }
    }
}
