use anyhow::{Context, Result};
use clap::Parser;
use resident_config::ConfigLoader;

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Worker { heartbeat_ms } => {
            // stdout carries IPC frames; worker logs go to stderr only
            resident_logging::init_worker_tracing(cli.log_level.as_deref())?;
            commands::worker::run(heartbeat_ms).await
        }
        Commands::Config { config_cmd } => commands::config::handle(config_cmd),
        Commands::Serve { workers } => {
            let mut config = ConfigLoader::new()
                .load(cli.config.as_ref())
                .context("Failed to load configuration")?;
            if let Some(workers) = workers {
                config.pool.workers = workers;
            }

            resident_logging::init_logging(&config.logging, cli.log_level.as_deref())?;
            commands::serve::run(config).await
        }
    }
}
