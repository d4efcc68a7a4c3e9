//! `txtpool daemon`: Telegram listener, HTTP gateway and optional sweeper.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use txtpool_channels::{TelegramChannel, TelegramConfig};
use txtpool_gateway::GatewayState;
use txtpool_listener::Listener;

/// Positional fallbacks for values missing from the config file and the
/// environment.
#[derive(clap::Args, Debug, Default)]
pub struct DaemonArgs {
    /// Watched directory (fallback for TG_FILES_DIR)
    pub dir: Option<PathBuf>,

    /// Bot token (fallback for TG_BOT_TOKEN)
    pub token: Option<String>,

    /// Authorized chat id (fallback for TG_CHAT_ID)
    #[arg(allow_negative_numbers = true)]
    pub chat_id: Option<i64>,
}

pub async fn run(config_path: Option<&Path>, args: DaemonArgs) -> anyhow::Result<()> {
    let mut config = super::load_config(config_path)?;
    config.fill_from_args(args.dir, args.token, args.chat_id);
    let credentials = config
        .telegram_credentials()
        .context("Telegram credentials are required (config file, environment or positional args)")?;

    let lifecycle = Arc::new(super::lifecycle(&config));
    let evicted = lifecycle
        .startup()
        .await
        .context("Failed to prepare watched directory")?;

    println!("txtpool daemon");
    println!("   Watching:  {}", lifecycle.policy().dir.display());
    println!("   Chat:      {}", credentials.chat_id);
    println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "   Retention: {}s",
        lifecycle.policy().retention.as_secs()
    );

    info!(
        evicted = evicted.evicted,
        failures = evicted.failures,
        "Startup eviction finished"
    );

    let channel = TelegramChannel::new(TelegramConfig::from_app_config(
        credentials,
        &config.telegram,
    ))
    .context("Failed to build Telegram channel")?;
    let listener = Listener::new(Arc::new(channel), Arc::clone(&lifecycle));

    let cancel = CancellationToken::new();

    let sweeper = config
        .storage
        .sweep_interval()
        .map(|every| Arc::clone(&lifecycle).spawn_sweeper(every, cancel.clone()));

    let mut tasks = JoinSet::new();
    {
        let cancel = cancel.clone();
        tasks.spawn(async move { listener.run(cancel).await.context("Listener failed") });
    }
    {
        let cancel = cancel.clone();
        let gateway = config.gateway.clone();
        let state = GatewayState::from_config(&config.storage);
        tasks.spawn(async move {
            txtpool_gateway::serve(&gateway, state, cancel)
                .await
                .context("Gateway failed")
        });
    }

    // The first task to finish, or Ctrl-C, brings everything down.
    let mut result = Ok(());
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutdown requested");
        }
        Some(joined) = tasks.join_next() => {
            result = flatten(joined);
        }
    }

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = flatten(joined) {
            if result.is_ok() {
                result = Err(e);
            } else {
                warn!(error = ?e, "Additional task failure during shutdown");
            }
        }
    }
    if let Some(sweeper) = sweeper
        && let Err(e) = sweeper.await
    {
        warn!(error = %e, "Sweeper task failed");
    }

    info!("Daemon stopped");
    result
}

fn flatten(joined: Result<anyhow::Result<()>, JoinError>) -> anyhow::Result<()> {
    joined.context("Task panicked")?
}
