//! Kafka transport for interaction events
//!
//! Events are keyed by video id so every change to one video lands on one
//! partition. Offsets are committed manually, only for batches whose counter
//! deltas have been committed to the store.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Delivery, EventConsumer, EventPublisher, QueueError, QueueResult, Receipt};
use crate::config::KafkaConfig;
use crate::domain::InteractionEvent;

/// Idempotent Kafka producer for interaction events
#[derive(Clone)]
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl KafkaEventPublisher {
    pub fn new(config: &KafkaConfig) -> QueueResult<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("retries", "3")
            .set("linger.ms", "5")
            .create::<FutureProducer>()?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            "Interaction event producer initialized"
        );

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: &InteractionEvent) -> QueueResult<()> {
        let payload = serde_json::to_string(event)?;
        let key = event.partition_key();
        let event_id = event.event_id.to_string();

        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "event_type",
                value: Some(event.kind.as_str()),
            })
            .insert(Header {
                key: "event_id",
                value: Some(event_id.as_str()),
            });

        let record = FutureRecord::to(&self.topic)
            .key(&key)
            .payload(&payload)
            .headers(headers);

        match self.producer.send(record, self.send_timeout).await {
            Ok((partition, offset)) => {
                debug!(
                    event_id = %event.event_id,
                    event_type = event.kind.as_str(),
                    partition,
                    offset,
                    "Published interaction event"
                );
                Ok(())
            }
            Err((err, _)) => Err(QueueError::Kafka(err)),
        }
    }
}

/// Consumer-group member reading interaction events with manual commits
pub struct KafkaEventConsumer {
    consumer: StreamConsumer,
}

impl KafkaEventConsumer {
    pub fn new(config: &KafkaConfig) -> QueueResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        info!(
            topic = %config.topic,
            group_id = %config.group_id,
            "Interaction event consumer subscribed"
        );

        Ok(Self { consumer })
    }
}

/// Highest offset seen per partition, as the next offset to read
fn commit_positions(deliveries: &[Delivery]) -> BTreeMap<(&str, i32), i64> {
    let mut positions: BTreeMap<(&str, i32), i64> = BTreeMap::new();
    for delivery in deliveries {
        let receipt = &delivery.receipt;
        let next = receipt.offset + 1;
        positions
            .entry((receipt.topic.as_str(), receipt.partition))
            .and_modify(|current| *current = (*current).max(next))
            .or_insert(next);
    }
    positions
}

#[async_trait]
impl EventConsumer for KafkaEventConsumer {
    async fn recv(&mut self) -> QueueResult<Delivery> {
        let message = match self.consumer.recv().await {
            Ok(message) => message,
            Err(KafkaError::Canceled) => return Err(QueueError::Closed),
            Err(err) => return Err(QueueError::Kafka(err)),
        };

        let receipt = Receipt {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        };

        let event = match message.payload() {
            Some(payload) => match serde_json::from_slice::<InteractionEvent>(payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(
                        topic = %receipt.topic,
                        partition = receipt.partition,
                        offset = receipt.offset,
                        error = %e,
                        "Undecodable interaction event, skipping"
                    );
                    None
                }
            },
            None => {
                warn!(
                    topic = %receipt.topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "Interaction event without payload, skipping"
                );
                None
            }
        };

        Ok(Delivery { receipt, event })
    }

    async fn ack(&mut self, deliveries: &[Delivery]) -> QueueResult<()> {
        if deliveries.is_empty() {
            return Ok(());
        }

        let mut tpl = TopicPartitionList::new();
        for ((topic, partition), offset) in commit_positions(deliveries) {
            tpl.add_partition_offset(topic, partition, Offset::Offset(offset))?;
        }

        self.consumer.commit(&tpl, CommitMode::Async)?;
        debug!(partitions = tpl.count(), "Committed consumer offsets");
        Ok(())
    }
}
