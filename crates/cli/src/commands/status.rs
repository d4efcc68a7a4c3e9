//! `txtpool status`: Show effective configuration and directory state.

use std::path::Path;

use txtpool_config::AppConfig;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let storage = &config.storage;
    let watch_dir = storage.watch_dir();

    println!("txtpool status");
    println!("==============");
    println!("  Config dir:  {}", AppConfig::config_dir().display());
    println!("  Watch dir:   {}", watch_dir.display());
    println!("  Extension:   {}", storage.extension);
    println!("  Retention:   {}s", storage.retention_secs);
    match storage.sweep_interval() {
        Some(every) => println!("  Sweeper:     every {}s", every.as_secs()),
        None => println!("  Sweeper:     disabled"),
    }
    println!("  Gateway:     {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "  Telegram:    {}",
        match config.telegram_credentials() {
            Ok(creds) => format!("chat {}", creds.chat_id),
            Err(e) => format!("not configured ({e})"),
        }
    );

    match std::fs::read_dir(&watch_dir) {
        Ok(entries) => {
            let files = entries
                .filter_map(Result::ok)
                .filter(|e| e.file_type().map(|t| !t.is_dir()).unwrap_or(false))
                .count();
            println!("\n  Files:       {files}");
        }
        Err(_) => println!("\n  Watch dir does not exist yet"),
    }

    match std::fs::metadata(storage.aggregate_path()) {
        Ok(meta) => println!("  {}: {} bytes", storage.aggregate_name, meta.len()),
        Err(_) => println!("  {}: not built yet", storage.aggregate_name),
    }

    match std::fs::metadata(storage.valid_path()) {
        Ok(meta) => println!("  {}: {} bytes", storage.valid_name, meta.len()),
        Err(_) => println!("  {}: none", storage.valid_name),
    }

    Ok(())
}
