pub mod clear;
pub mod config_cmd;
pub mod daemon;
pub mod gateway;
pub mod status;
pub mod sweep;

use std::path::Path;

use anyhow::Context;
use txtpool_config::AppConfig;
use txtpool_lifecycle::{Lifecycle, LifecyclePolicy};

/// Load the effective configuration (file, then environment).
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    AppConfig::load(path).context("Failed to load config")
}

/// Lifecycle handle over the configured watched directory.
pub fn lifecycle(config: &AppConfig) -> Lifecycle {
    Lifecycle::new(LifecyclePolicy::from_config(&config.storage))
}
