//! `txtpool sweep`: One lifecycle cycle, then exit.

use std::path::Path;

use anyhow::Context;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let lifecycle = super::lifecycle(&config);

    let report = lifecycle
        .run_cycle()
        .await
        .with_context(|| format!("Cycle failed for {}", lifecycle.policy().dir.display()))?;

    println!("Swept {}", lifecycle.policy().dir.display());
    println!("   Evicted: {} ({} failed)", report.evicted, report.eviction_failures);
    println!("   Merged:  {} ({} skipped)", report.merged, report.skipped);
    println!("   {}: {} bytes", lifecycle.policy().aggregate_name, report.bytes);

    Ok(())
}
