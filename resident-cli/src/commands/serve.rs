use anyhow::{Context, Result};
use resident_config::ResidentConfig;
use resident_server::ResidentServer;
use tracing::{info, warn};

/// Run the manager until a shutdown signal arrives
pub async fn run(config: ResidentConfig) -> Result<()> {
    let workers = config.pool.workers;
    let startup_timeout = config.pool.startup_timeout;

    let server = ResidentServer::new(config).context("Invalid server configuration")?;
    let handle = server.start().await.context("Failed to start server")?;
    handle
        .handle_signals()
        .context("Failed to install signal handlers")?;

    if let Some(addr) = handle.http_addr() {
        info!("HTTP listening on {}", addr);
    }
    if let Some(addr) = handle.socket_addr() {
        info!("Socket listening on {}", addr);
    }

    if handle.wait_ready(workers, startup_timeout).await {
        info!("{} workers ready", workers);
    } else {
        warn!("Not all workers were ready within {:?}", startup_timeout);
    }

    let report = handle.wait().await.context("Shutdown failed")?;
    if !report.clean {
        warn!("{} workers had to be killed during shutdown", report.forced);
    }
    Ok(())
}
