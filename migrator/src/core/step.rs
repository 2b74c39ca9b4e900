use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::core::client::database::{DatabaseError, MigrationStore};
use crate::types::version_record::{now, SchemaVersion};
use crate::utils::metrics::MIGRATOR_METRICS;
use opentelemetry::KeyValue;

#[derive(Error, Debug)]
pub enum StepError {
    #[error("Invalid document in {collection}: {reason}")]
    InvalidShape { collection: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Failed(String),
}

/// One version-to-version transformation of the store contents
///
/// Implementations must be re-runnable: every record-level write is
/// conditioned on the record not being migrated yet, so a second run after a
/// crash completes the remaining records and changes nothing else. A step never
/// touches the version record.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    fn from_version(&self) -> SchemaVersion;

    fn to_version(&self) -> SchemaVersion {
        self.from_version() + 1
    }

    fn description(&self) -> &'static str;

    /// Transform the store. The returned string is recorded as the history detail.
    async fn apply(&self, store: &dyn MigrationStore) -> Result<String, StepError>;
}

/// Outcome of a single step execution, with timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub success: bool,
    pub detail: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Executes migration steps against the live store
#[derive(Clone)]
pub struct StepRunner {
    store: Arc<dyn MigrationStore>,
}

impl StepRunner {
    pub fn new(store: Arc<dyn MigrationStore>) -> Self {
        Self { store }
    }

    /// Run `step` once. Errors and panics inside the step become a failed outcome.
    #[instrument(skip_all, fields(from = step.from_version(), to = step.to_version()))]
    pub async fn run(&self, step: &dyn MigrationStep) -> StepOutcome {
        let started_at = now();
        info!(description = step.description(), "Starting migration {} --> {}", step.from_version(), step.to_version());

        let result = AssertUnwindSafe(step.apply(self.store.as_ref())).catch_unwind().await;
        let (success, detail) = match result {
            Ok(Ok(detail)) => (true, detail),
            Ok(Err(e)) => (false, e.to_string()),
            Err(panic) => (false, format!("step panicked: {}", panic_message(panic.as_ref()))),
        };
        let completed_at = now();

        let elapsed = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let attributes = [
            KeyValue::new("step", format!("{}->{}", step.from_version(), step.to_version())),
            KeyValue::new("success", success),
        ];
        MIGRATOR_METRICS.migration_step_duration.record(elapsed, &attributes);

        if success {
            info!(detail = %detail, "Completed migration {} --> {}", step.from_version(), step.to_version());
        } else {
            error!(detail = %detail, "Error during migration {} --> {}", step.from_version(), step.to_version());
        }
        StepOutcome { success, detail, started_at, completed_at }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
