use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::client::database::constant::CONTROL_COLLECTION;
use crate::types::version_record::SchemaVersion;

/// Tunables of the migration driver and the sequence runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Lock acquisition attempts within a single driver invocation
    pub max_acquire_attempts: u32,
    /// Base delay between acquisition attempts, multiplied by the attempt number
    pub acquire_backoff_ms: u64,
    /// How often the sequence runner re-invokes a step that reported contention
    pub contention_retries: u32,
    pub contention_backoff_ms: u64,
    /// Version an absent version record is read as; unset means the source version of the first registered step
    pub baseline_version: Option<SchemaVersion>,
    pub control_collection: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            max_acquire_attempts: 5,
            acquire_backoff_ms: 250,
            contention_retries: 0,
            contention_backoff_ms: 1000,
            baseline_version: None,
            control_collection: CONTROL_COLLECTION.to_string(),
        }
    }
}

impl MigrationSettings {
    pub fn acquire_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.acquire_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn contention_backoff(&self) -> Duration {
        Duration::from_millis(self.contention_backoff_ms)
    }

    /// Fill in `baseline` unless a baseline was configured.
    pub fn with_default_baseline(mut self, baseline: SchemaVersion) -> Self {
        self.baseline_version.get_or_insert(baseline);
        self
    }
}
