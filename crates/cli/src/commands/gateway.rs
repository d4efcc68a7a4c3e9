//! `txtpool gateway`: Start only the HTTP server.

use std::path::Path;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use txtpool_gateway::GatewayState;

pub async fn run(config_path: Option<&Path>, port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = super::load_config(config_path)?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("txtpool gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Aggregate: {}", config.storage.aggregate_path().display());
    println!("   Valid:     {}", config.storage.valid_path().display());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            info!("Shutdown requested");
            cancel.cancel();
        });
    }

    txtpool_gateway::serve(
        &config.gateway,
        GatewayState::from_config(&config.storage),
        cancel,
    )
    .await
    .context("Gateway failed")
}
