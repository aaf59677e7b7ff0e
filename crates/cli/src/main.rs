//! signalflow: local driver for the normalizer, rule engine and workflow engine.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use signalflow_core::config::{load_dotenv, Config};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::for_profile(&cli.profile);
    config.log_summary();

    let output = match cli.command {
        Command::Normalize { agency, file } => commands::normalize(agency, &file)?,
        Command::Evaluate { store, context } => commands::evaluate(&config, &store, &context).await?,
        Command::Run {
            store,
            workflow,
            skip_idempotency_check,
            trigger,
        } => commands::run(&config, &store, &workflow, skip_idempotency_check, &trigger).await?,
        Command::Route { store, file } => commands::route(&config, &store, &file).await?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
