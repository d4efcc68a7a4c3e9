//! `txtpool config`: Configuration helpers.

use std::path::{Path, PathBuf};

use txtpool_config::AppConfig;

/// Print a complete config file holding every default, ready to be edited.
pub fn print_default() {
    print!("{}", AppConfig::default_toml());
}

/// Print the config file the other commands would read.
pub fn print_path(config_path: Option<&Path>) {
    println!("{}", effective_path(config_path).display());
}

fn effective_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}
