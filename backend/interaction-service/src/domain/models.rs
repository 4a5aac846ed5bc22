use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InteractionError, InteractionResult};

pub type VideoId = i64;
pub type UserId = i64;
pub type InteractionId = i64;

/// Longest comment accepted, in characters, after trimming
pub const MAX_COMMENT_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "interaction_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Comment,
    Like,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Comment => "comment",
            InteractionKind::Like => "like",
        }
    }
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interaction record - a comment or like by a user on a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Interaction {
    pub id: InteractionId,
    pub video_id: VideoId,
    pub user_id: UserId,
    pub kind: InteractionKind,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Create request as received from the boundary (actor supplied separately)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInteraction {
    pub video_id: VideoId,
    pub kind: InteractionKind,
    pub content: Option<String>,
}

impl CreateInteraction {
    pub fn comment(video_id: VideoId, content: impl Into<String>) -> Self {
        Self {
            video_id,
            kind: InteractionKind::Comment,
            content: Some(content.into()),
        }
    }

    pub fn like(video_id: VideoId) -> Self {
        Self {
            video_id,
            kind: InteractionKind::Like,
            content: None,
        }
    }

    /// Check the request and bind it to the acting user.
    ///
    /// Comments need non-blank content of at most [`MAX_COMMENT_CHARS`];
    /// likes must carry no content at all.
    pub fn validate(self, actor: UserId) -> InteractionResult<NewInteraction> {
        if self.video_id <= 0 {
            return Err(InteractionError::Validation(format!(
                "invalid video_id: {}",
                self.video_id
            )));
        }
        if actor <= 0 {
            return Err(InteractionError::Validation(format!(
                "invalid user_id: {}",
                actor
            )));
        }

        let content = match (self.kind, self.content) {
            (InteractionKind::Comment, None) => {
                return Err(InteractionError::Validation(
                    "comment text is required".to_string(),
                ))
            }
            (InteractionKind::Comment, Some(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(InteractionError::Validation(
                        "comment text is required".to_string(),
                    ));
                }
                let chars = text.chars().count();
                if chars > MAX_COMMENT_CHARS {
                    return Err(InteractionError::Validation(format!(
                        "comment text too long: {} characters (max {})",
                        chars, MAX_COMMENT_CHARS
                    )));
                }
                Some(text.to_string())
            }
            (InteractionKind::Like, Some(_)) => {
                return Err(InteractionError::Validation(
                    "likes cannot carry content".to_string(),
                ))
            }
            (InteractionKind::Like, None) => None,
        };

        Ok(NewInteraction {
            video_id: self.video_id,
            user_id: actor,
            kind: self.kind,
            content,
        })
    }
}

/// Validated record ready to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInteraction {
    pub video_id: VideoId,
    pub user_id: UserId,
    pub kind: InteractionKind,
    pub content: Option<String>,
}

/// Result of a store write; `inserted` is false when a like already existed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persisted {
    pub record: Interaction,
    pub inserted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeAction {
    Like,
    Unlike,
}

/// Aggregated counters for a video, written only by reconciliation.
///
/// Stored values are signed running sums so batches commute in any order; a
/// removal folded before its addition leaves a transient negative that only
/// [`VideoCounters::clamped`] hides from readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoCounters {
    pub video_id: VideoId,
    pub like_count: i64,
    pub comment_count: i64,
}

impl VideoCounters {
    pub fn zero(video_id: VideoId) -> Self {
        Self {
            video_id,
            like_count: 0,
            comment_count: 0,
        }
    }

    /// Reader view: never below zero
    pub fn clamped(self) -> Self {
        Self {
            video_id: self.video_id,
            like_count: self.like_count.max(0),
            comment_count: self.comment_count.max(0),
        }
    }
}

/// Parse an interaction id from its external decimal form
pub fn parse_interaction_id(raw: &str) -> InteractionResult<InteractionId> {
    match raw.trim().parse::<InteractionId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(InteractionError::Validation(format!(
            "invalid interaction id: {:?}",
            raw
        ))),
    }
}
