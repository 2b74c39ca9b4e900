use std::fmt;

use crate::types::version_record::SchemaVersion;

/// Result of one driver invocation for one migration step
///
/// Exceptional conditions (store unreachable, lock release failed) are
/// reported as errors instead; everything an operator or a deploy hook has to
/// react to is a variant here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The step ran and the version was advanced
    Migrated { from: SchemaVersion, to: SchemaVersion },
    /// The store is already at or past the step's target; nothing to do
    AlreadyMigrated { found: SchemaVersion },
    /// The store is older than the step's source version; predecessor steps are missing
    Behind { expected: SchemaVersion, found: SchemaVersion },
    /// Another run holds the upgrade lock
    Contended { version: SchemaVersion },
    /// The store is tainted and automated runs refuse to touch it
    Tainted,
    /// The pre-migration snapshot could not be taken; no data was changed
    BackupFailed { detail: String },
    /// The step failed; live data was rolled back to `backup` and the store is tainted
    Restored { detail: String, backup: String },
    /// The step failed and so did the rollback; the store is tainted and its data undefined
    RestoreFailed { detail: String },
}

impl RunOutcome {
    /// Whether a sequence of steps may continue after this outcome
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Migrated { .. } | RunOutcome::AlreadyMigrated { .. })
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Migrated { .. } | RunOutcome::AlreadyMigrated { .. } => 0,
            RunOutcome::Contended { .. } => 2,
            RunOutcome::Tainted => 3,
            RunOutcome::Behind { .. } => 4,
            RunOutcome::BackupFailed { .. } => 5,
            RunOutcome::Restored { .. } => 6,
            RunOutcome::RestoreFailed { .. } => 7,
        }
    }

    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Migrated { .. } => "migrated",
            RunOutcome::AlreadyMigrated { .. } => "already_migrated",
            RunOutcome::Behind { .. } => "behind",
            RunOutcome::Contended { .. } => "contended",
            RunOutcome::Tainted => "tainted",
            RunOutcome::BackupFailed { .. } => "backup_failed",
            RunOutcome::Restored { .. } => "restored",
            RunOutcome::RestoreFailed { .. } => "restore_failed",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Migrated { from, to } => write!(f, "migrated {from} -> {to}"),
            RunOutcome::AlreadyMigrated { found } => write!(f, "database already migrated (version {found}), nothing to do"),
            RunOutcome::Behind { expected, found } => {
                write!(f, "can only migrate database version {expected}, found {found}")
            }
            RunOutcome::Contended { version } => write!(f, "upgrade of version {version} in progress, retry later"),
            RunOutcome::Tainted => write!(f, "refusing to upgrade tainted database"),
            RunOutcome::BackupFailed { detail } => write!(f, "backup failed: {detail}"),
            RunOutcome::Restored { detail, backup } => {
                write!(f, "migration failed ({detail}); restored backup {backup}, database tainted")
            }
            RunOutcome::RestoreFailed { detail } => {
                write!(f, "migration failed and restore failed ({detail}); database tainted")
            }
        }
    }
}
