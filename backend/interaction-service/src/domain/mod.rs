pub mod events;
pub mod models;

pub use events::{aggregate_deltas, CounterDelta, EventKind, InteractionEvent};
pub use models::{
    parse_interaction_id, CreateInteraction, Interaction, InteractionId, InteractionKind,
    LikeAction, NewInteraction, Persisted, UserId, VideoCounters, VideoId,
};
