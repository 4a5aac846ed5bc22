//! Mutation orchestrator
//!
//! Every write fans out to the durable store and the cache. Both
//! sub-operations run to completion and their results are interpreted in one
//! place: the store decides success, the cache can only degrade it (or fail it
//! under [`CachePolicy::Strict`]). Counter updates never run here; a fact
//! about the committed write is published for the reconciliation worker.

use resilience::{presets, with_retry, Backoff, RetryConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::{counters_key, list_key, CacheClient, CacheError, CacheResult};
use crate::domain::{
    parse_interaction_id, CreateInteraction, Interaction, InteractionEvent, InteractionKind,
    LikeAction, UserId, VideoCounters, VideoId,
};
use crate::error::{InteractionError, InteractionResult};
use crate::metrics;
use crate::queue::EventPublisher;
use crate::repository::{InteractionStore, StoreError};

/// Newest records served per list view
pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// What to do when the cache cannot be invalidated after a durable write
#[derive(Debug, Clone, PartialEq)]
pub enum CachePolicy {
    /// Fail the request with a cache error even though the write is durable
    Strict,
    /// Report degraded success with a warning
    BestEffort,
    /// Re-attempt with backoff, then report degraded success
    Retry(RetryConfig),
}

impl CachePolicy {
    pub fn label(&self) -> &'static str {
        match self {
            CachePolicy::Strict => "strict",
            CachePolicy::BestEffort => "best_effort",
            CachePolicy::Retry(_) => "retry",
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Retry(presets::cache_invalidation())
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub cache_policy: CachePolicy,
    pub list_cache_ttl: Duration,
    pub counters_cache_ttl: Duration,
    pub list_limit: i64,
    pub publish_retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cache_policy: CachePolicy::default(),
            list_cache_ttl: Duration::from_secs(300),
            counters_cache_ttl: Duration::from_secs(30),
            list_limit: DEFAULT_LIST_LIMIT,
            publish_retry: presets::event_publish(),
        }
    }
}

/// Non-fatal problem attached to a successful mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    CacheInvalidation { key: String, reason: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::CacheInvalidation { key, reason } => {
                write!(f, "cache entry {:?} may be stale: {}", key, reason)
            }
        }
    }
}

/// Result of a write whose durable part succeeded
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome<T> {
    pub record: T,
    pub warnings: Vec<Warning>,
}

impl<T> MutationOutcome<T> {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Outcome of the cache sub-task of a create
enum InvalidationAttempt {
    Done(CacheResult<()>),
    Cancelled,
}

pub struct InteractionOrchestrator {
    store: Arc<dyn InteractionStore>,
    cache: Arc<dyn CacheClient>,
    publisher: Arc<dyn EventPublisher>,
    config: OrchestratorConfig,
}

impl InteractionOrchestrator {
    pub fn new(
        store: Arc<dyn InteractionStore>,
        cache: Arc<dyn CacheClient>,
        publisher: Arc<dyn EventPublisher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn create_interaction(
        &self,
        actor: UserId,
        request: CreateInteraction,
    ) -> InteractionResult<MutationOutcome<Interaction>> {
        self.create_interaction_until(actor, request, std::future::pending())
            .await
    }

    /// Create a record; `cancel` resolving stops only the cache sub-task.
    ///
    /// The persist step runs as a detached task: once issued it completes,
    /// and publishes its event, even if this future is dropped.
    pub async fn create_interaction_until<C>(
        &self,
        actor: UserId,
        request: CreateInteraction,
        cancel: C,
    ) -> InteractionResult<MutationOutcome<Interaction>>
    where
        C: Future<Output = ()> + Send,
    {
        let new = request.validate(actor)?;
        let key = list_key(new.kind, new.video_id);

        let store = Arc::clone(&self.store);
        let publisher = Arc::clone(&self.publisher);
        let publish_retry = self.config.publish_retry.clone();
        let to_persist = new.clone();
        let persist = tokio::spawn(async move {
            let persisted = store.create(&to_persist).await?;
            if persisted.inserted {
                publish_detached(
                    publisher,
                    publish_retry,
                    InteractionEvent::added(&persisted.record),
                );
            }
            Ok::<_, StoreError>(persisted)
        });

        let invalidate = async {
            tokio::select! {
                result = self.invalidate_once(&key) => InvalidationAttempt::Done(result),
                _ = cancel => InvalidationAttempt::Cancelled,
            }
        };

        let (persisted, invalidation) = tokio::join!(persist, invalidate);

        let persisted = match persisted {
            Ok(Ok(persisted)) => persisted,
            Ok(Err(e)) => {
                error!(
                    video_id = new.video_id,
                    user_id = new.user_id,
                    kind = %new.kind,
                    error = %e,
                    "Failed to persist interaction"
                );
                metrics::record_mutation("create", "error");
                return Err(e.into());
            }
            Err(join_err) => {
                error!(error = %join_err, "Persist task failed");
                metrics::record_mutation("create", "error");
                return Err(InteractionError::Internal(format!(
                    "persist task failed: {}",
                    join_err
                )));
            }
        };

        if !persisted.inserted {
            debug!(
                interaction_id = persisted.record.id,
                "Interaction already existed, nothing to publish"
            );
        }

        let warnings = match invalidation {
            InvalidationAttempt::Done(result) => self.settle(&key, result).await,
            InvalidationAttempt::Cancelled => {
                warn!(key = %key, "Cache invalidation cancelled by caller");
                Ok(vec![Warning::CacheInvalidation {
                    key: key.clone(),
                    reason: "cancelled".to_string(),
                }])
            }
        };

        let warnings = self.finish("create", warnings)?;

        info!(
            interaction_id = persisted.record.id,
            video_id = persisted.record.video_id,
            kind = %persisted.record.kind,
            inserted = persisted.inserted,
            "Interaction created"
        );

        Ok(MutationOutcome {
            record: persisted.record,
            warnings,
        })
    }

    /// Delete a record owned by `actor`, identified by its external id
    pub async fn delete_interaction(
        &self,
        actor: UserId,
        raw_id: &str,
    ) -> InteractionResult<MutationOutcome<Interaction>> {
        let id = parse_interaction_id(raw_id)?;
        let record = self.store.get_by_id(id).await?;

        if record.user_id != actor {
            return Err(InteractionError::PermissionDenied(format!(
                "interaction {} belongs to another user",
                id
            )));
        }

        self.remove(record, "delete").await
    }

    pub async fn like_action(
        &self,
        actor: UserId,
        video_id: VideoId,
        action: LikeAction,
    ) -> InteractionResult<MutationOutcome<Option<Interaction>>> {
        match action {
            LikeAction::Like => {
                let outcome = self
                    .create_interaction(actor, CreateInteraction::like(video_id))
                    .await?;
                Ok(MutationOutcome {
                    record: Some(outcome.record),
                    warnings: outcome.warnings,
                })
            }
            LikeAction::Unlike => {
                validate_video_id(video_id)?;
                match self.store.find_like(video_id, actor).await? {
                    Some(like) => {
                        let outcome = self.remove(like, "unlike").await?;
                        Ok(MutationOutcome {
                            record: Some(outcome.record),
                            warnings: outcome.warnings,
                        })
                    }
                    None => {
                        debug!(video_id, user_id = actor, "Unlike without a like");
                        Ok(MutationOutcome {
                            record: None,
                            warnings: Vec::new(),
                        })
                    }
                }
            }
        }
    }

    /// Newest records of `kind` for a video, served cache-aside
    pub async fn list_interactions(
        &self,
        video_id: VideoId,
        kind: InteractionKind,
    ) -> InteractionResult<Vec<Interaction>> {
        validate_video_id(video_id)?;
        let key = list_key(kind, video_id);

        if let Some(records) = self.cached::<Vec<Interaction>>(&key, "list").await {
            return Ok(records);
        }

        let records = self
            .store
            .list_by_video(video_id, kind, self.config.list_limit)
            .await?;
        self.fill(&key, &records, self.config.list_cache_ttl).await;
        Ok(records)
    }

    /// Reconciled counters for a video, served cache-aside
    pub async fn video_counters(&self, video_id: VideoId) -> InteractionResult<VideoCounters> {
        validate_video_id(video_id)?;
        let key = counters_key(video_id);

        if let Some(counters) = self.cached::<VideoCounters>(&key, "counters").await {
            return Ok(counters);
        }

        let counters = self.store.counters(video_id).await?;
        self.fill(&key, &counters, self.config.counters_cache_ttl)
            .await;
        Ok(counters)
    }

    /// Shared tail of delete and unlike: remove and publish in a detached
    /// task, then invalidate
    async fn remove(
        &self,
        record: Interaction,
        operation: &'static str,
    ) -> InteractionResult<MutationOutcome<Interaction>> {
        let store = Arc::clone(&self.store);
        let publisher = Arc::clone(&self.publisher);
        let publish_retry = self.config.publish_retry.clone();
        let removal = tokio::spawn(async move {
            let deleted = store.delete(&record).await?;
            publish_detached(publisher, publish_retry, InteractionEvent::removed(&deleted));
            Ok::<_, StoreError>(deleted)
        });

        let deleted = match removal.await {
            Ok(Ok(deleted)) => deleted,
            Ok(Err(e)) => {
                metrics::record_mutation(operation, "error");
                return Err(e.into());
            }
            Err(join_err) => {
                error!(error = %join_err, "Delete task failed");
                metrics::record_mutation(operation, "error");
                return Err(InteractionError::Internal(format!(
                    "delete task failed: {}",
                    join_err
                )));
            }
        };

        let key = list_key(deleted.kind, deleted.video_id);
        let first = self.invalidate_once(&key).await;
        let warnings = self.finish(operation, self.settle(&key, first).await)?;

        info!(
            interaction_id = deleted.id,
            video_id = deleted.video_id,
            kind = %deleted.kind,
            "Interaction deleted"
        );

        Ok(MutationOutcome {
            record: deleted,
            warnings,
        })
    }

    /// Drop `key` if it is cached
    async fn invalidate_once(&self, key: &str) -> CacheResult<()> {
        if self.cache.exists(key).await? {
            self.cache.delete(key).await?;
            debug!(key = %key, "Cache entry invalidated");
        }
        Ok(())
    }

    /// Apply the cache policy to the first invalidation attempt
    async fn settle(&self, key: &str, first: CacheResult<()>) -> InteractionResult<Vec<Warning>> {
        let err = match first {
            Ok(()) => return Ok(Vec::new()),
            Err(e) => e,
        };

        let policy = &self.config.cache_policy;
        let last = match policy {
            CachePolicy::Strict => {
                error!(key = %key, error = %err, "Cache invalidation failed after durable write");
                metrics::record_cache_invalidation_failure(policy.label());
                return Err(InteractionError::Cache(err));
            }
            CachePolicy::BestEffort => err,
            CachePolicy::Retry(retry) => match self.retry_invalidation(key, retry, err).await {
                Ok(()) => return Ok(Vec::new()),
                Err(last) => last,
            },
        };

        warn!(
            key = %key,
            policy = policy.label(),
            error = %last,
            "Cache invalidation failed, entry may be stale until it expires"
        );
        metrics::record_cache_invalidation_failure(policy.label());

        Ok(vec![Warning::CacheInvalidation {
            key: key.to_string(),
            reason: last.to_string(),
        }])
    }

    /// Up to `max_retries` further attempts after `first_err`
    async fn retry_invalidation(
        &self,
        key: &str,
        retry: &RetryConfig,
        first_err: CacheError,
    ) -> Result<(), CacheError> {
        let mut backoff = Backoff::new(retry);
        let mut last = first_err;

        for attempt in 1..=retry.max_retries {
            let delay = backoff.next_delay();
            debug!(
                key = %key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last,
                "Retrying cache invalidation"
            );
            tokio::time::sleep(delay).await;

            match self.invalidate_once(key).await {
                Ok(()) => return Ok(()),
                Err(e) => last = e,
            }
        }

        Err(last)
    }

    fn finish(
        &self,
        operation: &str,
        settled: InteractionResult<Vec<Warning>>,
    ) -> InteractionResult<Vec<Warning>> {
        match &settled {
            Ok(warnings) if warnings.is_empty() => metrics::record_mutation(operation, "ok"),
            Ok(_) => metrics::record_mutation(operation, "degraded"),
            Err(_) => metrics::record_mutation(operation, "error"),
        }
        settled
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str, view: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    metrics::record_cache_read(view, "hit");
                    Some(value)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Undecodable cache entry, reading through");
                    metrics::record_cache_read(view, "error");
                    None
                }
            },
            Ok(None) => {
                metrics::record_cache_read(view, "miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, reading through");
                metrics::record_cache_read(view, "error");
                None
            }
        }
    }

    async fn fill<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = self.cache.set(key, &raw, ttl).await {
            warn!(key = %key, error = %e, "Failed to populate cache");
        }
    }
}

/// Publish in the background with bounded retries; failures are logged only
fn publish_detached(
    publisher: Arc<dyn EventPublisher>,
    retry: RetryConfig,
    event: InteractionEvent,
) {
    tokio::spawn(async move {
        match with_retry(&retry, || publisher.publish(&event)).await {
            Ok(()) => metrics::record_event_publish("ok"),
            Err(e) => {
                let attempts = e.attempts();
                let last = e.into_last();
                error!(
                    event_id = %event.event_id,
                    event_type = event.kind.as_str(),
                    video_id = event.video_id,
                    attempts,
                    error = %last,
                    "Dropped interaction event after retries"
                );
                metrics::record_event_publish("failed");
            }
        }
    });
}

fn validate_video_id(video_id: VideoId) -> InteractionResult<()> {
    if video_id <= 0 {
        return Err(InteractionError::Validation(format!(
            "invalid video_id: {}",
            video_id
        )));
    }
    Ok(())
}
