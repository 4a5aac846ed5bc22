pub mod interactions;

pub use interactions::PgInteractionStore;

use async_trait::async_trait;
use idempotent_consumer::IdempotencyError;
use thiserror::Error;

use crate::domain::{
    Interaction, InteractionEvent, InteractionId, InteractionKind, NewInteraction, Persisted,
    UserId, VideoCounters, VideoId,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Idempotency tracking error: {0}")]
    Idempotency(#[from] IdempotencyError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A concurrent writer kept changing the row under us
    #[error("Conflicting concurrent write: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Failures of the backing service itself rather than of the request
    pub fn is_unavailable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            StoreError::Idempotency(e) => e.is_transient(),
            StoreError::NotFound(_) | StoreError::Conflict(_) => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of applying one batch of counter events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchApplied {
    /// Events claimed for the first time and folded into counters
    pub applied: usize,
    /// Events whose id had already been applied
    pub duplicates: usize,
}

/// Durable store for interaction records and their aggregated counters.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Persist a new record. A like that already exists is returned with
    /// `inserted == false` instead of failing.
    async fn create(&self, new: &NewInteraction) -> StoreResult<Persisted>;

    /// Fetch by id; absent records yield `StoreError::NotFound`
    async fn get_by_id(&self, id: InteractionId) -> StoreResult<Interaction>;

    /// Remove a record and return it as it was stored
    async fn delete(&self, record: &Interaction) -> StoreResult<Interaction>;

    async fn find_like(&self, video_id: VideoId, user_id: UserId)
        -> StoreResult<Option<Interaction>>;

    /// Newest-first records of one kind for a video
    async fn list_by_video(
        &self,
        video_id: VideoId,
        kind: InteractionKind,
        limit: i64,
    ) -> StoreResult<Vec<Interaction>>;

    /// Current counters clamped at zero; zero when never reconciled
    async fn counters(&self, video_id: VideoId) -> StoreResult<VideoCounters>;

    /// Atomically claim event ids and fold the fresh ones into counters.
    ///
    /// Events already claimed (including earlier in the same batch) are
    /// skipped, so redelivery never double-counts. Deltas are added to the
    /// stored sums unclamped, keeping batches order-independent.
    async fn apply_counter_batch(&self, events: &[InteractionEvent]) -> StoreResult<BatchApplied>;
}
