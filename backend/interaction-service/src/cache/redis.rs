use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use resilience::{with_timeout, TimeoutError};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::{CacheClient, CacheError, CacheResult};

/// Redis-backed cache client.
///
/// `ConnectionManager` is cheap to clone and reconnects on its own; every
/// command is bounded by `op_timeout` so a hung server cannot stall a request.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager, op_timeout: Duration) -> Self {
        Self { conn, op_timeout }
    }

    async fn bounded<T, F>(&self, op: F) -> CacheResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        with_timeout(self.op_timeout, op).await.map_err(|e| match e {
            TimeoutError::Elapsed(after) => CacheError::Timeout(after),
            TimeoutError::Inner(err) => CacheError::Redis(err),
        })
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.exists::<_, bool>(key).await })
            .await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.del::<_, ()>(key).await })
            .await?;
        debug!(key = %key, "Cache delete");
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let ttl_secs = ttl.as_secs().max(1);
        self.bounded(async move { conn.set_ex::<_, _, ()>(key, value, ttl_secs).await })
            .await?;
        debug!(key = %key, ttl_secs, "Cache set");
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            redis::cmd("PING").query_async::<_, String>(&mut conn).await
        })
        .await?;
        Ok(())
    }
}
