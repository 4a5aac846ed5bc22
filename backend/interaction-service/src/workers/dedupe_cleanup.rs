//! Prunes the processed-event ledger.
//!
//! Event ids only need to be remembered for as long as the queue may
//! redeliver them; rows older than the guard's retention are deleted hourly.

use async_trait::async_trait;
use idempotent_consumer::{IdempotencyGuard, IdempotencyResult};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::metrics;

pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Anything that can drop expired entries from the processed-event ledger
#[async_trait]
pub trait LedgerPruner: Send + Sync {
    /// Delete expired entries, returning how many were removed
    async fn prune(&self) -> IdempotencyResult<u64>;

    fn retention(&self) -> Duration;
}

#[async_trait]
impl LedgerPruner for IdempotencyGuard {
    async fn prune(&self) -> IdempotencyResult<u64> {
        self.cleanup_old_events().await
    }

    fn retention(&self) -> Duration {
        IdempotencyGuard::retention(self)
    }
}

/// Prune once per `interval` (first pass immediately) until shutdown.
/// Returns the number of passes attempted.
pub async fn run<P: LedgerPruner>(
    pruner: P,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    info!(
        interval_secs = interval.as_secs(),
        retention_secs = pruner.retention().as_secs(),
        "Processed-event cleanup started"
    );

    let mut ticker = tokio::time::interval(interval);
    let mut passes = 0u64;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        passes += 1;
        match pruner.prune().await {
            Ok(0) => debug!("No expired processed events"),
            Ok(rows) => {
                info!(rows, "Pruned expired processed events");
                metrics::record_processed_events_pruned(rows);
            }
            Err(e) => warn!(error = %e, "Failed to prune processed events"),
        }
    }

    info!(passes, "Processed-event cleanup stopped");
    passes
}
