//! txtpool CLI: the main entry point.
//!
//! Commands:
//! - `daemon`: Telegram listener + HTTP gateway (the default)
//! - `gateway`: Only the HTTP gateway
//! - `sweep`: Run one eviction + aggregation cycle and exit
//! - `clear`: Delete every file in the watched directory
//! - `status`: Show effective configuration and directory state
//! - `config`: Print the default config file or its location
//!
//! Invoked without a subcommand, `txtpool [DIR] [TOKEN] [CHAT_ID]` runs the
//! daemon, taking positional values only where the config file and the
//! environment left them unset.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::daemon::DaemonArgs;

#[derive(Parser)]
#[command(
    name = "txtpool",
    about = "Collect .txt uploads from Telegram and serve them merged over HTTP",
    version,
    author,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    daemon: DaemonArgs,

    /// Path to the config file (default: ~/.txtpool/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Telegram listener and the HTTP gateway
    Daemon(DaemonArgs),

    /// Start only the HTTP gateway
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one lifecycle cycle (evict stale files, rebuild the aggregate)
    Sweep,

    /// Delete every file in the watched directory
    Clear,

    /// Show effective configuration and directory state
    Status,

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a config file holding every default
    Default,
    /// Print the path of the config file in use
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        None => commands::daemon::run(config_path, cli.daemon).await?,
        Some(Commands::Daemon(args)) => commands::daemon::run(config_path, args).await?,
        Some(Commands::Gateway { port }) => commands::gateway::run(config_path, port).await?,
        Some(Commands::Sweep) => commands::sweep::run(config_path).await?,
        Some(Commands::Clear) => commands::clear::run(config_path).await?,
        Some(Commands::Status) => commands::status::run(config_path).await?,
        Some(Commands::Config { action }) => match action {
            ConfigAction::Default => commands::config_cmd::print_default(),
            ConfigAction::Path => commands::config_cmd::print_path(config_path),
        },
    }

    Ok(())
}
