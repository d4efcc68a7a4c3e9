//! Configuration loading, validation, and management for txtpool.
//!
//! Loads configuration from `~/.txtpool/config.toml` (or an explicit path)
//! with environment variable overrides. Positional command-line arguments only
//! fill values that neither the file nor the environment provided.
//!
//! The resulting [`AppConfig`] is built once at startup and handed to each
//! component by value; nothing reads configuration from ambient state later.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the watched directory.
pub const ENV_FILES_DIR: &str = "TG_FILES_DIR";
/// Environment variable holding the Telegram bot token.
pub const ENV_BOT_TOKEN: &str = "TG_BOT_TOKEN";
/// Environment variable holding the authorized chat id.
pub const ENV_CHAT_ID: &str = "TG_CHAT_ID";
/// Environment variable overriding the HTTP listen port.
pub const ENV_PORT: &str = "TXTPOOL_PORT";

/// The root configuration structure.
///
/// Maps directly to `~/.txtpool/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Watched directory, aggregate and valid-artifact layout
    #[serde(default)]
    pub storage: StorageConfig,

    /// Telegram bot settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// HTTP gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory receiving uploads. Unset means "not provided yet"; see
    /// [`StorageConfig::watch_dir`] for the effective value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_dir: Option<PathBuf>,

    #[serde(default = "default_aggregate_name")]
    pub aggregate_name: String,

    /// Recognized text extension, including the leading dot
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Files older than this are evicted on the next cycle
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Periodic sweep interval. 0 = only sweep after uploads.
    #[serde(default)]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    #[serde(default = "default_valid_name")]
    pub valid_name: String,
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("files")
}
fn default_aggregate_name() -> String {
    "all.txt".into()
}
fn default_extension() -> String {
    ".txt".into()
}
fn default_retention_secs() -> u64 {
    4 * 60 * 60
}
fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_valid_name() -> String {
    "valid.txt".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            watch_dir: None,
            aggregate_name: default_aggregate_name(),
            extension: default_extension(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: 0,
            uploads_dir: default_uploads_dir(),
            valid_name: default_valid_name(),
        }
    }
}

impl StorageConfig {
    /// The effective watched directory (`files` when nothing was configured).
    pub fn watch_dir(&self) -> PathBuf {
        self.watch_dir.clone().unwrap_or_else(default_watch_dir)
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.watch_dir().join(&self.aggregate_name)
    }

    pub fn valid_path(&self) -> PathBuf {
        self.uploads_dir.join(&self.valid_name)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// The periodic sweep interval, or `None` when disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// The single chat allowed to upload files and issue commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Long-polling timeout passed to `getUpdates`.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.telegram.org".into()
}
fn default_poll_timeout_secs() -> u64 {
    60
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// Credentials the bot listener cannot run without.
#[derive(Clone)]
pub struct TelegramCredentials {
    pub bot_token: String,
    pub chat_id: i64,
}

impl std::fmt::Debug for TelegramCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramCredentials")
            .field("bot_token", &"[REDACTED]")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Maximum accepted request body for `POST /valid`
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, or from `~/.txtpool/config.toml` when
    /// no path is given, then apply environment overrides:
    /// - `TG_FILES_DIR`: watched directory
    /// - `TG_BOT_TOKEN`: bot token
    /// - `TG_CHAT_ID`: authorized chat id
    /// - `TXTPOOL_PORT`: HTTP listen port
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let default_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(path.unwrap_or(&default_path))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get(ENV_FILES_DIR) {
            self.storage.watch_dir = Some(PathBuf::from(dir));
        }
        if let Some(token) = get(ENV_BOT_TOKEN) {
            self.telegram.bot_token = Some(token);
        }
        if let Some(chat_id) = get(ENV_CHAT_ID) {
            self.telegram.chat_id = Some(parse_env(ENV_CHAT_ID, &chat_id)?);
        }
        if let Some(port) = get(ENV_PORT) {
            self.gateway.port = parse_env(ENV_PORT, &port)?;
        }
        Ok(())
    }

    /// Fill values still unset after file and environment from positional
    /// command-line arguments. Values already present are never replaced.
    pub fn fill_from_args(
        &mut self,
        watch_dir: Option<PathBuf>,
        bot_token: Option<String>,
        chat_id: Option<i64>,
    ) {
        if self.storage.watch_dir.is_none() {
            self.storage.watch_dir = watch_dir;
        }
        if self.telegram.bot_token.is_none() {
            self.telegram.bot_token = bot_token;
        }
        if self.telegram.chat_id.is_none() {
            self.telegram.chat_id = chat_id;
        }
    }

    /// The bot token and chat id, required by the listener.
    pub fn telegram_credentials(&self) -> Result<TelegramCredentials, ConfigError> {
        let bot_token = self
            .telegram
            .bot_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing(ENV_BOT_TOKEN))?;
        let chat_id = self.telegram.chat_id.ok_or(ConfigError::Missing(ENV_CHAT_ID))?;
        Ok(TelegramCredentials { bot_token, chat_id })
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".txtpool")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let storage = &self.storage;

        if storage.retention_secs == 0 {
            return Err(ConfigError::ValidationError(
                "storage.retention_secs must be > 0".into(),
            ));
        }

        if !storage.extension.starts_with('.') || storage.extension.len() < 2 {
            return Err(ConfigError::ValidationError(format!(
                "storage.extension must look like \".txt\", got {:?}",
                storage.extension
            )));
        }

        for (field, name) in [
            ("storage.aggregate_name", &storage.aggregate_name),
            ("storage.valid_name", &storage.valid_name),
        ] {
            if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(ConfigError::ValidationError(format!(
                    "{field} must be a plain file name, got {name:?}"
                )));
            }
        }

        if self.telegram.poll_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "telegram.poll_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
        })
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("Missing required setting {0} (config file, environment, or positional argument)")]
    Missing(&'static str),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
