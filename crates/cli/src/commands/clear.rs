//! `txtpool clear`: Delete every file in the watched directory.

use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let lifecycle = super::lifecycle(&config);

    let report = lifecycle.clear().await?;

    println!("Deleted {} file(s)", report.removed);
    if let Some(err) = report.first_error {
        anyhow::bail!("{} file(s) could not be deleted, first error: {err}", report.failed);
    }

    Ok(())
}
