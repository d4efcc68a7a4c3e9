//! File lifecycle manager for the txtpool watched directory.
//!
//! A lifecycle cycle evicts files older than the retention threshold and then
//! rebuilds the aggregate from the surviving text files. The synchronous
//! building blocks live in [`cycle`] and [`clear`]; [`Lifecycle`] is the async
//! handle the listener, the sweeper and the CLI share.

pub mod clear;
pub mod cycle;

pub use clear::{ClearReport, delete_all, delete_all_with};
pub use cycle::{CycleReport, EvictionReport, LifecyclePolicy, evict_stale, merge, run_cycle};

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use txtpool_core::LifecycleError;

/// Shared handle over one watched directory.
///
/// Cycles and clears are serialized through an internal lock and run on the
/// blocking thread pool.
pub struct Lifecycle {
    policy: Arc<LifecyclePolicy>,
    gate: Mutex<()>,
}

impl Lifecycle {
    pub fn new(policy: LifecyclePolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            gate: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Create the watched directory if it does not exist yet.
    pub async fn prepare(&self) -> Result<(), LifecycleError> {
        tokio::fs::create_dir_all(&self.policy.dir)
            .await
            .map_err(|source| LifecycleError::CreateDir {
                path: self.policy.dir.clone(),
                source,
            })
    }

    /// Daemon startup: create the directory and drop files that went stale
    /// while nothing was running. The aggregate is left alone, so a fresh
    /// directory keeps serving nothing until the first upload.
    pub async fn startup(&self) -> Result<EvictionReport, LifecycleError> {
        self.prepare().await?;
        let _guard = self.gate.lock().await;
        let policy = Arc::clone(&self.policy);
        tokio::task::spawn_blocking(move || evict_stale(&policy, SystemTime::now()))
            .await
            .map_err(|e| LifecycleError::TaskAborted(e.to_string()))?
    }

    /// Run one eviction + aggregation cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, LifecycleError> {
        let _guard = self.gate.lock().await;
        let policy = Arc::clone(&self.policy);
        tokio::task::spawn_blocking(move || run_cycle(&policy, SystemTime::now()))
            .await
            .map_err(|e| LifecycleError::TaskAborted(e.to_string()))?
    }

    /// Remove every file below the watched directory.
    pub async fn clear(&self) -> Result<ClearReport, LifecycleError> {
        let _guard = self.gate.lock().await;
        let policy = Arc::clone(&self.policy);
        tokio::task::spawn_blocking(move || delete_all(&policy.dir))
            .await
            .map_err(|e| LifecycleError::TaskAborted(e.to_string()))?
    }

    /// Run a cycle every `every` until `cancel` fires. The first cycle runs
    /// one interval after the start.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let every = every.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_secs = every.as_secs(), "Sweeper started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match self.run_cycle().await {
                    Ok(report) => debug!(
                        evicted = report.evicted,
                        merged = report.merged,
                        "Periodic sweep finished"
                    ),
                    Err(e) => warn!(error = %e, "Periodic sweep failed"),
                }
            }

            info!("Sweeper stopped");
        })
    }
}
