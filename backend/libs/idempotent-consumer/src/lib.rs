//! # Idempotent Consumer Library
//!
//! Exactly-once-in-effect application of at-least-once queue deliveries, using
//! PostgreSQL to remember which event ids have already been applied.
//!
//! ## Problem
//!
//! The event queue redelivers on consumer restarts, rebalances and missed
//! acknowledgements. Counter updates are not idempotent on their own: applying
//! `like +1` twice double-counts.
//!
//! ## Solution
//!
//! Claim the event id in the **same transaction** that applies its effect:
//!
//! ```text
//! BEGIN
//!   INSERT INTO processed_events (event_id) ... ON CONFLICT DO NOTHING   -- claim
//!   (only if claimed) UPDATE counters ...                               -- effect
//! COMMIT
//! ```
//!
//! Either both the claim and the effect commit, or neither does, so a crash
//! between them cannot lose or duplicate an effect. A plain check-then-process
//! guard cannot give that guarantee.
//!
//! ## Usage
//!
//! ```ignore
//! use idempotent_consumer::IdempotencyGuard;
//!
//! # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let mut tx = pool.begin().await?;
//! if IdempotencyGuard::claim(&mut tx, "5f0c...", None).await? {
//!     sqlx::query("UPDATE video_counters SET like_count = like_count + 1 WHERE video_id = $1")
//!         .bind(42_i64)
//!         .execute(&mut *tx)
//!         .await?;
//! }
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Retention
//!
//! Claimed ids are kept for a configurable window (default 7 days) and pruned
//! by [`IdempotencyGuard::cleanup_old_events`]. The window must exceed the
//! queue's maximum redelivery horizon.

use anyhow::Context;
use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use std::time::Duration;
use tracing::{debug, info};

mod error;

pub use error::{IdempotencyError, IdempotencyResult};

/// Default retention for claimed event ids
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 86400);

/// Max length accepted for an event id (matches the column width)
const MAX_EVENT_ID_LEN: usize = 255;

/// Tracks applied event ids in the `processed_events` table.
#[derive(Clone)]
pub struct IdempotencyGuard {
    pool: PgPool,
    retention_duration: Duration,
}

impl IdempotencyGuard {
    pub fn new(pool: PgPool, retention_duration: Duration) -> Self {
        Self {
            pool,
            retention_duration,
        }
    }

    /// Claim `event_id` on an open connection or transaction.
    ///
    /// Returns `Ok(true)` when this call recorded the id (first delivery) and
    /// `Ok(false)` when it was already present (duplicate). Claims made
    /// earlier in the same transaction count as present.
    pub async fn claim(
        conn: &mut PgConnection,
        event_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> IdempotencyResult<bool> {
        Self::validate_event_id(event_id)?;

        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, metadata, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(&metadata)
        .execute(&mut *conn)
        .await?;

        let claimed = result.rows_affected() > 0;
        if !claimed {
            debug!(event_id = %event_id, "Event already processed (duplicate)");
        }

        Ok(claimed)
    }

    /// Check whether an event id has been claimed
    pub async fn is_processed(&self, event_id: &str) -> IdempotencyResult<bool> {
        Self::validate_event_id(event_id)?;

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_events WHERE event_id = $1
            )
            "#,
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check if event is processed")?;

        Ok(exists)
    }

    /// Delete claims older than the retention window; returns rows removed
    pub async fn cleanup_old_events(&self) -> IdempotencyResult<u64> {
        let retention = chrono::Duration::from_std(self.retention_duration).map_err(|e| {
            IdempotencyError::Other(anyhow::anyhow!("Invalid retention duration: {}", e))
        })?;
        let cutoff_time = Utc::now() - retention;

        let result = sqlx::query(
            r#"
            DELETE FROM processed_events
            WHERE processed_at < $1
            "#,
        )
        .bind(cutoff_time)
        .execute(&self.pool)
        .await
        .context("Failed to cleanup old events")?;

        let deleted_count = result.rows_affected();
        if deleted_count > 0 {
            info!(
                deleted_count,
                cutoff_time = %cutoff_time,
                "Cleaned up old processed events"
            );
        }

        Ok(deleted_count)
    }

    pub fn retention(&self) -> Duration {
        self.retention_duration
    }

    pub fn validate_event_id(event_id: &str) -> IdempotencyResult<()> {
        if event_id.is_empty() {
            return Err(IdempotencyError::InvalidEventId(
                "Event ID cannot be empty".to_string(),
            ));
        }

        if event_id.len() > MAX_EVENT_ID_LEN {
            return Err(IdempotencyError::InvalidEventId(format!(
                "Event ID too long: {} characters (max {})",
                event_id.len(),
                MAX_EVENT_ID_LEN
            )));
        }

        Ok(())
    }
}
