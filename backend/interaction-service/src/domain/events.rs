//! Interaction events consumed by counter reconciliation.
//!
//! Events are facts about the durable store ("a like was added"), never
//! commands. Their ids are derived from the interaction they describe so that
//! re-publishing the same fact yields the same id and is deduplicated on apply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;
use uuid::Uuid;

use super::models::{Interaction, InteractionId, InteractionKind, UserId, VideoId};

/// UUIDv5 namespace for interaction event ids
const EVENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b7e_9a4d_4c3e_8b1f_5d2a_7e90_c4a1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LikeAdded,
    LikeRemoved,
    CommentAdded,
    CommentRemoved,
}

impl EventKind {
    pub fn added(kind: InteractionKind) -> Self {
        match kind {
            InteractionKind::Like => EventKind::LikeAdded,
            InteractionKind::Comment => EventKind::CommentAdded,
        }
    }

    pub fn removed(kind: InteractionKind) -> Self {
        match kind {
            InteractionKind::Like => EventKind::LikeRemoved,
            InteractionKind::Comment => EventKind::CommentRemoved,
        }
    }

    /// Routing name carried in queue headers
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LikeAdded => "interaction.like.added",
            EventKind::LikeRemoved => "interaction.like.removed",
            EventKind::CommentAdded => "interaction.comment.added",
            EventKind::CommentRemoved => "interaction.comment.removed",
        }
    }

    pub fn delta(&self) -> CounterDelta {
        match self {
            EventKind::LikeAdded => CounterDelta { likes: 1, comments: 0 },
            EventKind::LikeRemoved => CounterDelta { likes: -1, comments: 0 },
            EventKind::CommentAdded => CounterDelta { likes: 0, comments: 1 },
            EventKind::CommentRemoved => CounterDelta { likes: 0, comments: -1 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub event_id: Uuid,
    pub interaction_id: InteractionId,
    pub video_id: VideoId,
    pub user_id: UserId,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
}

impl InteractionEvent {
    pub fn added(record: &Interaction) -> Self {
        Self::new(record, EventKind::added(record.kind), record.created_at)
    }

    pub fn removed(record: &Interaction) -> Self {
        Self::new(record, EventKind::removed(record.kind), Utc::now())
    }

    fn new(record: &Interaction, kind: EventKind, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Self::derive_id(kind, record.id),
            interaction_id: record.id,
            video_id: record.video_id,
            user_id: record.user_id,
            kind,
            occurred_at,
        }
    }

    /// Stable id for "`kind` happened to interaction `interaction_id`"
    pub fn derive_id(kind: EventKind, interaction_id: InteractionId) -> Uuid {
        let name = format!("{}:{}", kind.as_str(), interaction_id);
        Uuid::new_v5(&EVENT_NAMESPACE, name.as_bytes())
    }

    /// Partition key: all events of a video land on one partition
    pub fn partition_key(&self) -> String {
        self.video_id.to_string()
    }
}

/// Signed change to a video's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub likes: i64,
    pub comments: i64,
}

impl CounterDelta {
    pub fn is_zero(&self) -> bool {
        self.likes == 0 && self.comments == 0
    }
}

impl AddAssign for CounterDelta {
    fn add_assign(&mut self, rhs: Self) {
        self.likes += rhs.likes;
        self.comments += rhs.comments;
    }
}

/// Fold events into one delta per video.
///
/// Sums commute, so arrival order inside a batch does not matter. Videos whose
/// changes cancel out are dropped. Keys come back sorted, which keeps row-lock
/// order stable across concurrent batches.
pub fn aggregate_deltas<'a>(
    events: impl IntoIterator<Item = &'a InteractionEvent>,
) -> BTreeMap<VideoId, CounterDelta> {
    let mut deltas: BTreeMap<VideoId, CounterDelta> = BTreeMap::new();
    for event in events {
        *deltas.entry(event.video_id).or_default() += event.kind.delta();
    }
    deltas.retain(|_, delta| !delta.is_zero());
    deltas
}
