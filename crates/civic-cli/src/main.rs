//! Civic CLI - Follow municipal complaints from the command line
//!
//! One-shot listings plus a live view that tracks status changes as they happen.

mod cli;
mod commands;
mod error;


use civic_core::config::ClientConfig;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::complaints::run_complaints;
use crate::commands::timeline::run_timeline;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "civic=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env().merged_with(cli.client_config());

    match cli.command {
        Commands::Complaints { citizen, json } => run_complaints(&config, &citizen, json).await?,
        Commands::Timeline { complaint_id, json } => {
            run_timeline(&config, &complaint_id, json).await?;
        }
        Commands::Watch { citizen, select } => {
            run_watch(&config, &citizen, select.as_deref()).await?;
        }
    }

    Ok(())
}
