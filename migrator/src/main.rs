use clap::Parser as _;
use dotenvy::dotenv;
use migrator::cli::Cli;
use migrator::commands::{execute, CommandOutput};
use migrator::config::builder::load_config;
use migrator::core::client::database::mongodb::MongoStore;
use migrator::types::params::DatabaseArgs;
use migrator::utils::logging::init_logging;
use migrator::MigratorResult;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    init_logging();
    let cli = Cli::parse();
    info!(command = ?cli.command, "Starting migrator");

    match run(&cli).await {
        Ok(output) => {
            print_report(&output);
            ExitCode::from(output.exit_code)
        }
        Err(e) => {
            error!(error = %e, error_chain = ?e, "Migrator command failed");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: &Cli) -> MigratorResult<CommandOutput> {
    let config = load_config(cli.config_file.as_deref(), &cli.mongodb_args, &cli.migration_args)?;
    let store = MongoStore::new(&DatabaseArgs::from(&config.database)).await?;
    execute(&cli.command, Arc::new(store), &config).await
}

#[allow(clippy::print_stdout)]
fn print_report(output: &CommandOutput) {
    match serde_json::to_string_pretty(&output.report) {
        Ok(report) => println!("{report}"),
        Err(e) => error!(error = %e, "Failed to render report"),
    }
}
