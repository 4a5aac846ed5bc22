use async_trait::async_trait;
use idempotent_consumer::IdempotencyGuard;
use sqlx::PgPool;
use std::future::Future;
use tracing::debug;

use super::{BatchApplied, InteractionStore, StoreError, StoreResult};
use crate::domain::{
    aggregate_deltas, Interaction, InteractionEvent, InteractionId, InteractionKind,
    NewInteraction, Persisted, UserId, VideoCounters, VideoId,
};

/// PostgreSQL-backed interaction store
#[derive(Clone)]
pub struct PgInteractionStore {
    pool: PgPool,
}

impl PgInteractionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert unless the like already exists; `None` on conflict
    async fn insert_row(&self, new: &NewInteraction) -> StoreResult<Option<Interaction>> {
        let inserted = sqlx::query_as::<_, Interaction>(
            r#"
            INSERT INTO interactions (video_id, user_id, kind, content)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (video_id, user_id) WHERE kind = 'like' DO NOTHING
            RETURNING id, video_id, user_id, kind, content, created_at
            "#,
        )
        .bind(new.video_id)
        .bind(new.user_id)
        .bind(new.kind)
        .bind(&new.content)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted)
    }
}

/// Rounds of insert-then-lookup before giving up on a like that keeps
/// being removed between the two statements
const LIKE_INSERT_ATTEMPTS: usize = 2;

/// Insert, or hand back the row that won the conflict. An unlike can commit
/// between the conflicting insert and the lookup; the insert is then retried.
async fn create_or_existing<I, IF, F, FF>(mut insert: I, mut find: F) -> StoreResult<Persisted>
where
    I: FnMut() -> IF,
    IF: Future<Output = StoreResult<Option<Interaction>>>,
    F: FnMut() -> FF,
    FF: Future<Output = StoreResult<Option<Interaction>>>,
{
    for attempt in 1..=LIKE_INSERT_ATTEMPTS {
        if let Some(record) = insert().await? {
            return Ok(Persisted {
                record,
                inserted: true,
            });
        }
        if let Some(record) = find().await? {
            return Ok(Persisted {
                record,
                inserted: false,
            });
        }
        debug!(attempt, "Conflicting like vanished before lookup");
    }

    Err(StoreError::Conflict(format!(
        "like removed concurrently {} times",
        LIKE_INSERT_ATTEMPTS
    )))
}

#[async_trait]
impl InteractionStore for PgInteractionStore {
    async fn create(&self, new: &NewInteraction) -> StoreResult<Persisted> {
        let persisted = create_or_existing(
            move || self.insert_row(new),
            move || self.find_like(new.video_id, new.user_id),
        )
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => StoreError::Conflict(format!(
                "like of video {} by user {}",
                new.video_id, new.user_id
            )),
            other => other,
        })?;

        if !persisted.inserted {
            debug!(
                interaction_id = persisted.record.id,
                video_id = new.video_id,
                user_id = new.user_id,
                "Like already exists"
            );
        }

        Ok(persisted)
    }

    async fn get_by_id(&self, id: InteractionId) -> StoreResult<Interaction> {
        sqlx::query_as::<_, Interaction>(
            r#"
            SELECT id, video_id, user_id, kind, content, created_at
            FROM interactions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("interaction {}", id)))
    }

    async fn delete(&self, record: &Interaction) -> StoreResult<Interaction> {
        sqlx::query_as::<_, Interaction>(
            r#"
            DELETE FROM interactions
            WHERE id = $1
            RETURNING id, video_id, user_id, kind, content, created_at
            "#,
        )
        .bind(record.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("interaction {}", record.id)))
    }

    async fn find_like(
        &self,
        video_id: VideoId,
        user_id: UserId,
    ) -> StoreResult<Option<Interaction>> {
        let like = sqlx::query_as::<_, Interaction>(
            r#"
            SELECT id, video_id, user_id, kind, content, created_at
            FROM interactions
            WHERE video_id = $1 AND user_id = $2 AND kind = 'like'
            "#,
        )
        .bind(video_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(like)
    }

    async fn list_by_video(
        &self,
        video_id: VideoId,
        kind: InteractionKind,
        limit: i64,
    ) -> StoreResult<Vec<Interaction>> {
        let records = sqlx::query_as::<_, Interaction>(
            r#"
            SELECT id, video_id, user_id, kind, content, created_at
            FROM interactions
            WHERE video_id = $1 AND kind = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(video_id)
        .bind(kind)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn counters(&self, video_id: VideoId) -> StoreResult<VideoCounters> {
        let counters = sqlx::query_as::<_, VideoCounters>(
            r#"
            SELECT video_id, like_count, comment_count
            FROM video_counters
            WHERE video_id = $1
            "#,
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(counters
            .map(VideoCounters::clamped)
            .unwrap_or_else(|| VideoCounters::zero(video_id)))
    }

    async fn apply_counter_batch(&self, events: &[InteractionEvent]) -> StoreResult<BatchApplied> {
        let mut tx = self.pool.begin().await?;

        let mut fresh = Vec::with_capacity(events.len());
        for event in events {
            let metadata = serde_json::json!({
                "kind": event.kind.as_str(),
                "video_id": event.video_id,
                "interaction_id": event.interaction_id,
            });
            let event_id = event.event_id.to_string();
            if IdempotencyGuard::claim(&mut *tx, &event_id, Some(metadata)).await? {
                fresh.push(event);
            }
        }

        let deltas = aggregate_deltas(fresh.iter().copied());
        for (video_id, delta) in &deltas {
            sqlx::query(
                r#"
                INSERT INTO video_counters (video_id, like_count, comment_count, updated_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (video_id) DO UPDATE
                SET like_count = video_counters.like_count + $2,
                    comment_count = video_counters.comment_count + $3,
                    updated_at = NOW()
                "#,
            )
            .bind(video_id)
            .bind(delta.likes)
            .bind(delta.comments)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(BatchApplied {
            applied: fresh.len(),
            duplicates: events.len() - fresh.len(),
        })
    }
}
