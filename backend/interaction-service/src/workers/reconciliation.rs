//! Counter reconciliation worker
//!
//! A single long-lived consumer that folds interaction events into
//! `video_counters`. Deliveries are batched, applied in one store transaction
//! that also claims their event ids, and acknowledged only after that
//! transaction committed. Redelivered events are claimed already and fold to
//! nothing, so at-least-once delivery yields exactly-once counters.

use anyhow::Result;
use resilience::{presets, Backoff, RetryConfig};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cache::{counters_key, CacheClient};
use crate::domain::InteractionEvent;
use crate::metrics;
use crate::queue::{Delivery, EventConsumer, QueueError};
use crate::repository::InteractionStore;

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Upper bound on deliveries held in one batch
    pub max_batch: usize,
    /// How long to keep gathering after the first delivery of a batch
    pub batch_window: Duration,
    /// Receive failures in a row tolerated before the worker gives up
    pub max_consecutive_queue_errors: u32,
    /// Pause after a failed receive
    pub queue_error_backoff: Duration,
    /// Delay shape for re-applying a batch while the store is down
    pub apply_backoff: RetryConfig,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            max_batch: 500,
            batch_window: Duration::from_millis(200),
            max_consecutive_queue_errors: 10,
            queue_error_backoff: Duration::from_secs(1),
            apply_backoff: presets::reconciliation(),
        }
    }
}

pub struct ReconciliationWorker {
    consumer: Box<dyn EventConsumer>,
    store: Arc<dyn InteractionStore>,
    cache: Arc<dyn CacheClient>,
    config: ReconciliationConfig,
    queue_failures: u32,
}

impl ReconciliationWorker {
    pub fn new(
        consumer: Box<dyn EventConsumer>,
        store: Arc<dyn InteractionStore>,
        cache: Arc<dyn CacheClient>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            consumer,
            store,
            cache,
            config,
            queue_failures: 0,
        }
    }

    /// Consume until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Returns an error only when the queue can no longer be read; the caller
    /// is expected to treat that as fatal for the process.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            max_batch = self.config.max_batch,
            batch_window_ms = self.config.batch_window.as_millis() as u64,
            "Reconciliation worker started"
        );

        while let Some(batch) = self.collect_batch(&mut shutdown).await? {
            self.process(batch, &mut shutdown).await;
        }

        info!("Reconciliation worker drained and stopped");
        Ok(())
    }

    /// Block for one delivery, then gather until the batch is full or the
    /// window closes. `None` means shutdown was requested before anything
    /// arrived.
    async fn collect_batch(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Vec<Delivery>>> {
        let first = loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return Ok(None),
                received = self.consumer.recv() => match received {
                    Ok(delivery) => {
                        self.queue_failures = 0;
                        break delivery;
                    }
                    Err(e) => self.on_queue_error(e).await?,
                },
            }
        };

        let mut batch = Vec::with_capacity(self.config.max_batch.min(64));
        batch.push(first);

        let window = tokio::time::sleep(self.config.batch_window);
        tokio::pin!(window);

        while batch.len() < self.config.max_batch {
            tokio::select! {
                biased;
                _ = &mut window => break,
                _ = shutdown_requested(shutdown) => break,
                received = self.consumer.recv() => match received {
                    Ok(delivery) => {
                        self.queue_failures = 0;
                        batch.push(delivery);
                    }
                    Err(e) => self.on_queue_error(e).await?,
                },
            }
        }

        Ok(Some(batch))
    }

    async fn on_queue_error(&mut self, err: QueueError) -> Result<()> {
        if err.is_fatal() {
            error!(error = %err, "Event queue closed, reconciliation cannot continue");
            return Err(anyhow::Error::new(err).context("reconciliation worker stopped"));
        }

        self.queue_failures += 1;
        if self.queue_failures > self.config.max_consecutive_queue_errors {
            error!(
                consecutive_failures = self.queue_failures,
                error = %err,
                "Event queue keeps failing, giving up"
            );
            let failures = self.queue_failures;
            return Err(anyhow::Error::new(err).context(format!(
                "event queue failed {} consecutive times",
                failures
            )));
        }

        warn!(
            consecutive_failures = self.queue_failures,
            error = %err,
            "Failed to receive interaction event"
        );
        tokio::time::sleep(self.config.queue_error_backoff).await;
        Ok(())
    }

    /// Apply one batch, retrying through store outages, then acknowledge it.
    ///
    /// Shutdown during an outage abandons the batch unacknowledged; it is
    /// redelivered to the next consumer.
    async fn process(&mut self, batch: Vec<Delivery>, shutdown: &mut watch::Receiver<bool>) {
        metrics::observe_batch_size(batch.len());

        let events: Vec<InteractionEvent> = batch.iter().filter_map(|d| d.event.clone()).collect();
        let undecodable = batch.len() - events.len();
        if undecodable > 0 {
            metrics::record_reconciled_events("undecodable", undecodable);
        }

        if !events.is_empty() {
            let mut backoff = Backoff::new(&self.config.apply_backoff);
            let mut attempt: u32 = 0;

            let applied = loop {
                attempt += 1;
                match self.store.apply_counter_batch(&events).await {
                    Ok(applied) => break applied,
                    Err(e) => {
                        let delay = backoff.next_delay();
                        metrics::record_reconciliation_retry();
                        warn!(
                            attempt,
                            batch_size = events.len(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Failed to apply counter batch, retrying"
                        );

                        tokio::select! {
                            biased;
                            _ = shutdown_requested(shutdown) => {
                                warn!(
                                    batch_size = batch.len(),
                                    "Shutdown during store outage, leaving batch unacknowledged"
                                );
                                return;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            };

            metrics::record_reconciled_events("applied", applied.applied);
            metrics::record_reconciled_events("duplicate", applied.duplicates);
            debug!(
                applied = applied.applied,
                duplicates = applied.duplicates,
                "Counter batch committed"
            );

            if applied.applied > 0 {
                self.invalidate_counters(&events).await;
            }
        }

        if let Err(e) = self.consumer.ack(&batch).await {
            warn!(
                batch_size = batch.len(),
                error = %e,
                "Failed to acknowledge batch, it will be redelivered"
            );
        }
    }

    /// Drop cached counters of every video in the batch; failures only log
    async fn invalidate_counters(&self, events: &[InteractionEvent]) {
        let videos: BTreeSet<_> = events.iter().map(|e| e.video_id).collect();
        for video_id in videos {
            let key = counters_key(video_id);
            if let Err(e) = self.cache.delete(&key).await {
                debug!(key = %key, error = %e, "Failed to invalidate cached counters");
            }
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_bounded() {
        let config = ReconciliationConfig::default();
        assert!(config.max_batch > 0);
        assert!(config.batch_window < Duration::from_secs(1));
        assert_eq!(config.apply_backoff, presets::reconciliation());
    }

    #[tokio::test]
    async fn test_shutdown_requested_resolves_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { shutdown_requested(&mut rx).await });
        tx.send(true).unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_requested_resolves_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        shutdown_requested(&mut rx).await;
    }
}
