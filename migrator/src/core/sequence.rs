use tracing::{info, instrument, warn};

use crate::core::driver::MigrationDriver;
use crate::error::MigratorResult;
use crate::migrations::StepRegistry;
use crate::types::version_record::SchemaVersion;
use crate::types::RunOutcome;

/// Outcome of running the registered chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    /// One outcome per invoked step, in order
    pub outcomes: Vec<RunOutcome>,
}

impl SequenceReport {
    /// The outcome that decides the exit status: the first non-success, else the last one
    pub fn decisive(&self) -> Option<&RunOutcome> {
        self.outcomes.iter().find(|outcome| !outcome.is_success()).or_else(|| self.outcomes.last())
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(RunOutcome::is_success)
    }

    pub fn exit_code(&self) -> u8 {
        self.decisive().map(RunOutcome::exit_code).unwrap_or(0)
    }
}

/// Invokes the driver for every registered step in order and halts on the first non-success
pub struct SequenceRunner<'a> {
    driver: &'a MigrationDriver,
    registry: &'a StepRegistry,
}

impl<'a> SequenceRunner<'a> {
    pub fn new(driver: &'a MigrationDriver, registry: &'a StepRegistry) -> Self {
        Self { driver, registry }
    }

    /// Run every step whose target is at most `target_version` (default: the latest).
    ///
    /// With `wait_on_contention` a contended step is re-invoked up to
    /// `contention_retries` times, sleeping `contention_backoff_ms` in between.
    #[instrument(skip(self))]
    pub async fn run(&self, target_version: Option<SchemaVersion>, wait_on_contention: bool) -> MigratorResult<SequenceReport> {
        let target = target_version.unwrap_or_else(|| self.registry.latest());
        let settings = self.driver.settings();
        let mut outcomes = Vec::new();

        for step in self.registry.steps().take_while(|step| step.to_version() <= target) {
            let mut retries = 0;
            let outcome = loop {
                let outcome = self.driver.run_step(step).await?;
                match outcome {
                    RunOutcome::Contended { .. } if wait_on_contention && retries < settings.contention_retries => {
                        retries += 1;
                        warn!(retry = retries, max = settings.contention_retries, "Upgrade in progress, waiting");
                        tokio::time::sleep(settings.contention_backoff()).await;
                    }
                    outcome => break outcome,
                }
            };

            let halt = !outcome.is_success();
            outcomes.push(outcome);
            if halt {
                warn!(from = step.from_version(), "Halting migration sequence");
                break;
            }
        }

        info!(steps = outcomes.len(), "Migration sequence finished");
        Ok(SequenceReport { outcomes })
    }

    /// Run exactly the step registered for `from`.
    pub async fn run_one(&self, from: SchemaVersion) -> MigratorResult<RunOutcome> {
        let step = self.registry.get(from)?;
        self.driver.run_step(step).await
    }
}
