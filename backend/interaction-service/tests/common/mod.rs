//! In-memory doubles for the store, cache and queue seams
//!
//! Each double records how often it was called and can be told to fail, so
//! tests can check which sub-operations ran and how failures were aggregated.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use rdkafka::error::KafkaError;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use interaction_service::cache::{CacheClient, CacheError, CacheResult};
use interaction_service::domain::{
    aggregate_deltas, Interaction, InteractionEvent, InteractionId, InteractionKind,
    NewInteraction, Persisted, UserId, VideoCounters, VideoId,
};
use interaction_service::queue::{
    Delivery, EventConsumer, EventPublisher, QueueError, QueueResult, Receipt,
};
use interaction_service::repository::{BatchApplied, InteractionStore, StoreError, StoreResult};

pub fn calls(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Remaining failures to inject; `u32::MAX` fails forever
#[derive(Default)]
struct FailureBudget(AtomicU32);

impl FailureBudget {
    fn set(&self, n: u32) {
        self.0.store(n, Ordering::SeqCst);
    }

    /// True when this call should fail
    fn take(&self) -> bool {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return false;
            }
            if current == u32::MAX {
                return true;
            }
            match self.0.compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

// ========== Store ==========

#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    records: Mutex<BTreeMap<InteractionId, Interaction>>,
    counters: Mutex<HashMap<VideoId, VideoCounters>>,
    processed: Mutex<HashSet<Uuid>>,
    create_delay: Mutex<Option<Duration>>,
    delete_delay: Mutex<Option<Duration>>,
    fail_creates: FailureBudget,
    fail_applies: FailureBudget,
    pub create_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub counters_calls: AtomicUsize,
    pub apply_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_creates(&self, n: u32) {
        self.fail_creates.set(n);
    }

    pub fn fail_applies(&self, n: u32) {
        self.fail_applies.set(n);
    }

    pub fn delay_creates(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    pub fn delay_deletes(&self, delay: Duration) {
        *self.delete_delay.lock().unwrap() = Some(delay);
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn contains(&self, id: InteractionId) -> bool {
        self.records.lock().unwrap().contains_key(&id)
    }

    /// Stored running sums, before the reader clamp
    pub fn counters_of(&self, video_id: VideoId) -> VideoCounters {
        self.counters
            .lock()
            .unwrap()
            .get(&video_id)
            .cloned()
            .unwrap_or_else(|| VideoCounters::zero(video_id))
    }

    pub fn set_counters(&self, counters: VideoCounters) {
        self.counters
            .lock()
            .unwrap()
            .insert(counters.video_id, counters);
    }
}

#[async_trait]
impl InteractionStore for MemoryStore {
    async fn create(&self, new: &NewInteraction) -> StoreResult<Persisted> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_creates.take() {
            return Err(StoreError::Unavailable("injected store failure".to_string()));
        }

        let mut records = self.records.lock().unwrap();
        if new.kind == InteractionKind::Like {
            if let Some(existing) = records.values().find(|r| {
                r.kind == InteractionKind::Like
                    && r.video_id == new.video_id
                    && r.user_id == new.user_id
            }) {
                return Ok(Persisted {
                    record: existing.clone(),
                    inserted: false,
                });
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = Interaction {
            id,
            video_id: new.video_id,
            user_id: new.user_id,
            kind: new.kind,
            content: new.content.clone(),
            created_at: Utc::now(),
        };
        records.insert(id, record.clone());

        Ok(Persisted {
            record,
            inserted: true,
        })
    }

    async fn get_by_id(&self, id: InteractionId) -> StoreResult<Interaction> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("interaction {}", id)))
    }

    async fn delete(&self, record: &Interaction) -> StoreResult<Interaction> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delete_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.records
            .lock()
            .unwrap()
            .remove(&record.id)
            .ok_or_else(|| StoreError::NotFound(format!("interaction {}", record.id)))
    }

    async fn find_like(
        &self,
        video_id: VideoId,
        user_id: UserId,
    ) -> StoreResult<Option<Interaction>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.kind == InteractionKind::Like && r.video_id == video_id && r.user_id == user_id)
            .cloned())
    }

    async fn list_by_video(
        &self,
        video_id: VideoId,
        kind: InteractionKind,
        limit: i64,
    ) -> StoreResult<Vec<Interaction>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .rev()
            .filter(|r| r.video_id == video_id && r.kind == kind)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn counters(&self, video_id: VideoId) -> StoreResult<VideoCounters> {
        self.counters_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.counters_of(video_id).clamped())
    }

    async fn apply_counter_batch(&self, events: &[InteractionEvent]) -> StoreResult<BatchApplied> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_applies.take() {
            return Err(StoreError::Unavailable("injected store outage".to_string()));
        }

        // Claim and apply under one lock: all or nothing, like the transaction
        let mut processed = self.processed.lock().unwrap();
        let mut counters = self.counters.lock().unwrap();

        let fresh: Vec<&InteractionEvent> = events
            .iter()
            .filter(|e| processed.insert(e.event_id))
            .collect();

        for (video_id, delta) in aggregate_deltas(fresh.iter().copied()) {
            let entry = counters
                .entry(video_id)
                .or_insert_with(|| VideoCounters::zero(video_id));
            entry.like_count += delta.likes;
            entry.comment_count += delta.comments;
        }

        Ok(BatchApplied {
            applied: fresh.len(),
            duplicates: events.len() - fresh.len(),
        })
    }
}

// ========== Cache ==========

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    latency: Mutex<Option<Duration>>,
    fail_ops: FailureBudget,
    pub exists_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub set_calls: AtomicUsize,
    pub ping_calls: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` operations (`u32::MAX`: until healed)
    pub fn fail_next(&self, n: u32) {
        self.fail_ops.set(n);
    }

    pub fn fail_always(&self) {
        self.fail_ops.set(u32::MAX);
    }

    pub fn heal(&self) {
        self.fail_ops.set(0);
    }

    pub fn slow_down(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    async fn enter(&self) -> CacheResult<()> {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_ops.take() {
            return Err(CacheError::Unavailable("injected cache failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        Ok(self.contains(key))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> CacheResult<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        self.insert(key, value);
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await
    }
}

// ========== Queue ==========

#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<InteractionEvent>>,
    fail_publishes: FailureBudget,
    pub publish_calls: AtomicUsize,
}

impl MemoryPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_publishes.set(n);
    }

    pub fn published(&self) -> Vec<InteractionEvent> {
        self.published.lock().unwrap().clone()
    }

    /// Wait until at least `n` events were published (detached tasks)
    pub async fn wait_for(&self, n: usize) -> Vec<InteractionEvent> {
        for _ in 0..200 {
            let published = self.published();
            if published.len() >= n {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.published()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, event: &InteractionEvent) -> QueueResult<()> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_publishes.take() {
            return Err(QueueError::Kafka(KafkaError::Canceled));
        }
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Test-side handle feeding a [`MemoryConsumer`]
pub struct QueueFeed {
    tx: Option<mpsc::UnboundedSender<QueueResult<Delivery>>>,
    next_offset: i64,
    acked: Arc<Mutex<Vec<Receipt>>>,
}

pub struct MemoryConsumer {
    rx: mpsc::UnboundedReceiver<QueueResult<Delivery>>,
    acked: Arc<Mutex<Vec<Receipt>>>,
}

pub fn memory_queue() -> (QueueFeed, MemoryConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let acked = Arc::new(Mutex::new(Vec::new()));
    (
        QueueFeed {
            tx: Some(tx),
            next_offset: 0,
            acked: acked.clone(),
        },
        MemoryConsumer { rx, acked },
    )
}

impl QueueFeed {
    fn push(&mut self, event: Option<InteractionEvent>) -> Receipt {
        let receipt = Receipt {
            topic: "interaction-events".to_string(),
            partition: 0,
            offset: self.next_offset,
        };
        self.next_offset += 1;
        if let Some(tx) = &self.tx {
            let _ = tx.send(Ok(Delivery {
                receipt: receipt.clone(),
                event,
            }));
        }
        receipt
    }

    pub fn send(&mut self, event: InteractionEvent) -> Receipt {
        self.push(Some(event))
    }

    /// A delivery whose payload could not be decoded
    pub fn send_garbage(&mut self) -> Receipt {
        self.push(None)
    }

    pub fn send_error(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(QueueError::Kafka(KafkaError::NoMessageReceived)));
        }
    }

    /// Drop the sender; the consumer then reports the queue as closed
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn acked(&self) -> Vec<Receipt> {
        self.acked.lock().unwrap().clone()
    }

    /// Wait until at least `n` deliveries were acknowledged
    pub async fn wait_for_acks(&self, n: usize) -> Vec<Receipt> {
        for _ in 0..400 {
            let acked = self.acked();
            if acked.len() >= n {
                return acked;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.acked()
    }
}

#[async_trait]
impl EventConsumer for MemoryConsumer {
    async fn recv(&mut self) -> QueueResult<Delivery> {
        match self.rx.recv().await {
            Some(item) => item,
            None => Err(QueueError::Closed),
        }
    }

    async fn ack(&mut self, deliveries: &[Delivery]) -> QueueResult<()> {
        self.acked
            .lock()
            .unwrap()
            .extend(deliveries.iter().map(|d| d.receipt.clone()));
        Ok(())
    }
}

// ========== Fixtures ==========

pub fn comment(id: InteractionId, video_id: VideoId, user_id: UserId) -> Interaction {
    Interaction {
        id,
        video_id,
        user_id,
        kind: InteractionKind::Comment,
        content: Some("hello".to_string()),
        created_at: Utc::now(),
    }
}

pub fn like(id: InteractionId, video_id: VideoId, user_id: UserId) -> Interaction {
    Interaction {
        id,
        video_id,
        user_id,
        kind: InteractionKind::Like,
        content: None,
        created_at: Utc::now(),
    }
}
