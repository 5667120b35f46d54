use anyhow::{Context, Result};
use osprey_core::ServerConfig;
use osprey_relay::registry::{ReconnectRegistry, SessionRegistry};
use osprey_relay::HttpServer;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config;

pub async fn init_config(config_path: &Path) -> Result<()> {
    let default_config = ServerConfig::default();
    config::save_config(config_path, &default_config).await?;
    println!("Configuration file created at: {}", config_path.display());
    println!("\nPlease review and edit the configuration before starting the server.");
    Ok(())
}

pub async fn run(config_path: &Path) -> Result<()> {
    info!("Starting Osprey relay...");

    let config = config::load_config(config_path)
        .await
        .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("Configuration loaded from {}", config_path.display());

    // Registries are injected, not global; the interactive-session layer
    // shares these instances to publish credentials and tokens.
    let sessions = Arc::new(SessionRegistry::new());
    let reconnect = Arc::new(ReconnectRegistry::new());
    reconnect.start_sweeper();

    let server = HttpServer::new(Arc::clone(&sessions), Arc::clone(&reconnect), config);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("Relay server error: {}", e);
        }
    });

    info!("Osprey relay is running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    server_handle.abort();

    Ok(())
}
