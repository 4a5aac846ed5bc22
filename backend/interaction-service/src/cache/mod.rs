//! Cache client seam
//!
//! Cache entries hold JSON-serialized views of the store and are never
//! authoritative. Keys are derived from the subject only, so every writer and
//! reader of a view agrees on where it lives.

pub mod redis;

pub use self::redis::RedisCache;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{InteractionKind, VideoId};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Narrow key/value surface the service needs from its cache
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Round-trip to the server; keeps idle connections warm
    async fn ping(&self) -> CacheResult<()>;
}

/// Comment-list view of a video: the bare decimal id
pub fn comment_list_key(video_id: VideoId) -> String {
    video_id.to_string()
}

pub fn like_list_key(video_id: VideoId) -> String {
    format!("likes:{}", video_id)
}

/// List view key for the given kind
pub fn list_key(kind: InteractionKind, video_id: VideoId) -> String {
    match kind {
        InteractionKind::Comment => comment_list_key(video_id),
        InteractionKind::Like => like_list_key(video_id),
    }
}

pub fn counters_key(video_id: VideoId) -> String {
    format!("counters:{}", video_id)
}
