use anyhow::Result;
use tracing::info;

use trawl::config::Config;
use trawl::coordinator::CoordinatorServer;

/// Run the coordinator server until interrupted
pub async fn serve() -> Result<()> {
    let config = Config::from_env()?;
    config.validate()?;

    info!(
        bind = %config.server.bind_address,
        webhook_base = %config.fetcher.webhook_base_url,
        "Configuration loaded"
    );

    let server = CoordinatorServer::new(config).await?;
    server.start_with_shutdown(shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
