use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::config::MigratorConfig;
use crate::core::check::CompatibilityCheck;
use crate::core::client::database::MigrationStore;
use crate::core::operator::OperatorCommands;
use crate::core::{MigrationDriver, SequenceRunner};
use crate::error::{MigratorError, MigratorResult};
use crate::migrations::StepRegistry;

/// What a command produced: the process exit status and a JSON report for stdout
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub exit_code: u8,
    pub report: Value,
}

impl CommandOutput {
    fn ok(report: Value) -> Self {
        Self { exit_code: 0, report }
    }
}

/// Execute `command` against `store`.
pub async fn execute(
    command: &Commands,
    store: Arc<dyn MigrationStore>,
    config: &MigratorConfig,
) -> MigratorResult<CommandOutput> {
    let settings = &config.migration;
    let operator = || OperatorCommands::new(store.clone(), &settings.control_collection);

    match command {
        Commands::Migrate { target_version, wait_on_contention } => {
            let registry = StepRegistry::builtin()?;
            let driver = MigrationDriver::new(store.clone(), settings.clone().with_default_baseline(registry.baseline()));
            let report = SequenceRunner::new(&driver, &registry).run(*target_version, *wait_on_contention).await?;
            let outcomes: Vec<String> = report.outcomes.iter().map(ToString::to_string).collect();
            Ok(CommandOutput {
                exit_code: report.exit_code(),
                report: json!({ "success": report.is_success(), "outcomes": outcomes }),
            })
        }
        Commands::RunStep { from } => {
            let registry = StepRegistry::builtin()?;
            let driver = MigrationDriver::new(store.clone(), settings.clone().with_default_baseline(registry.baseline()));
            let outcome = SequenceRunner::new(&driver, &registry).run_one(*from).await?;
            Ok(CommandOutput {
                exit_code: outcome.exit_code(),
                report: json!({ "success": outcome.is_success(), "outcome": outcome.label(), "detail": outcome.to_string() }),
            })
        }
        Commands::Status => {
            let record = operator().status().await?;
            Ok(CommandOutput::ok(serde_json::to_value(record)?))
        }
        Commands::Check { expected_version, initialize } => {
            let gate = CompatibilityCheck::new(store.clone(), &settings.control_collection);
            match gate.check(*expected_version, *initialize).await {
                Ok(record) => Ok(CommandOutput::ok(json!({ "compatible": true, "version": record.version }))),
                Err(crate::core::check::CheckError::DatabaseError(e)) => Err(e.into()),
                Err(e) => Ok(CommandOutput {
                    exit_code: e.exit_code(),
                    report: json!({ "compatible": false, "reason": e.to_string() }),
                }),
            }
        }
        Commands::ClearTaint => {
            let cleared = operator().clear_taint().await?;
            if !cleared {
                warn!("Database was not tainted");
            }
            Ok(CommandOutput::ok(json!({ "cleared": cleared })))
        }
        Commands::Unlock => {
            let released = operator().force_unlock().await?;
            Ok(CommandOutput::ok(json!({ "released": released })))
        }
        Commands::ForgetBackup => {
            let backup = operator().forget_backup().await?;
            if backup.is_none() {
                info!("No backup referenced");
            }
            Ok(CommandOutput::ok(json!({ "forgotten": serde_json::to_value(backup)? })))
        }
    }
}
