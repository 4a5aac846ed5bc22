//! Event queue seam
//!
//! The queue is durable, ordered per partition key and delivers at least
//! once. Publishers never block a request on it; the consumer side hands out
//! deliveries that must be acknowledged explicitly after they were applied.

pub mod kafka;

pub use kafka::{KafkaEventConsumer, KafkaEventPublisher};

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::domain::InteractionEvent;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Event queue closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Errors after which the consumer cannot make progress
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueueError::Closed)
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Position of a delivery in the queue, used to acknowledge it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// One message handed to the consumer.
///
/// `event` is `None` when the payload could not be decoded; such deliveries
/// are still acknowledged so they are not redelivered forever.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: Receipt,
    pub event: Option<InteractionEvent>,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &InteractionEvent) -> QueueResult<()>;
}

#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Wait for the next delivery. Must be safe to drop mid-await.
    async fn recv(&mut self) -> QueueResult<Delivery>;

    /// Acknowledge everything up to and including these deliveries
    async fn ack(&mut self, deliveries: &[Delivery]) -> QueueResult<()>;
}
