//! In-memory partitioned broker for tests/dev.
//!
//! Models the parts of a log-based broker the pipeline relies on:
//!
//! - topics split into partitions, keyed publishing
//! - consumer groups with per-partition committed offsets
//! - partition assignment rebalanced when members join or leave
//! - redelivery of uncommitted messages after a rebalance
//!
//! No IO. A consumer dropped without `close()` leaves its group the same way
//! a crashed process would: its uncommitted deliveries become visible to the
//! remaining members.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::queue::{Consumer, Delivery, Publisher, QueueError, TaskQueue, partition_for};

#[derive(Debug, Clone)]
struct Record {
    key: String,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Members in join order.
    members: Vec<String>,
    /// Next offset to deliver per partition.
    committed: Vec<u64>,
    /// Member currently holding an uncommitted delivery, per partition.
    in_flight: Vec<Option<String>>,
    /// Delivery count per (partition, offset).
    attempts: HashMap<(u32, u64), u32>,
    /// Round-robin cursor per member so one hot partition cannot starve others.
    cursor: HashMap<String, usize>,
}

impl GroupState {
    fn new(partitions: u32) -> Self {
        Self {
            committed: vec![0; partitions as usize],
            in_flight: vec![None; partitions as usize],
            ..Default::default()
        }
    }

    fn owner_of(&self, partition: u32) -> Option<&str> {
        if self.members.is_empty() {
            return None;
        }
        let idx = partition as usize % self.members.len();
        Some(self.members[idx].as_str())
    }

    fn assigned(&self, member: &str, partitions: u32) -> Vec<u32> {
        (0..partitions)
            .filter(|p| self.owner_of(*p) == Some(member))
            .collect()
    }

    fn join(&mut self, member: &str) {
        if !self.members.iter().any(|m| m == member) {
            self.members.push(member.to_string());
            self.rebalance();
        }
    }

    fn leave(&mut self, member: &str) {
        self.members.retain(|m| m != member);
        self.cursor.remove(member);
        self.rebalance();
    }

    /// In-flight deliveries whose partition changed owner go back to the group.
    fn rebalance(&mut self) {
        for p in 0..self.in_flight.len() {
            let owner = self.owner_of(p as u32).map(str::to_string);
            if self.in_flight[p].is_some() && self.in_flight[p] != owner {
                self.in_flight[p] = None;
            }
        }
    }
}

#[derive(Debug)]
struct Inner {
    partitions: u32,
    topics: HashMap<String, Vec<Vec<Record>>>,
    /// Keyed by `(topic, group)`.
    groups: HashMap<(String, String), GroupState>,
}

impl Inner {
    fn topic_mut(&mut self, topic: &str) -> &mut Vec<Vec<Record>> {
        let partitions = self.partitions as usize;
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions])
    }

    fn group_mut(&mut self, topic: &str, group: &str) -> &mut GroupState {
        let partitions = self.partitions;
        self.groups
            .entry((topic.to_string(), group.to_string()))
            .or_insert_with(|| GroupState::new(partitions))
    }
}

/// In-memory broker. Cloning yields another handle to the same broker.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    open_publishers: Arc<AtomicUsize>,
    fail_publish: Arc<AtomicBool>,
}

impl InMemoryBroker {
    pub fn new(partitions: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                partitions: partitions.max(1),
                topics: HashMap::new(),
                groups: HashMap::new(),
            })),
            notify: Arc::new(Notify::new()),
            open_publishers: Arc::new(AtomicUsize::new(0)),
            fail_publish: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, QueueError> {
        self.inner
            .lock()
            .map_err(|_| QueueError::Connection("in-memory broker lock poisoned".to_string()))
    }

    /// Number of publishing handles currently alive.
    pub fn open_publishers(&self) -> usize {
        self.open_publishers.load(Ordering::SeqCst)
    }

    /// Make every publish fail until reset (simulates an unreachable broker).
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// All payloads on `topic`, partition by partition, in publish order.
    pub fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner
            .topics
            .get(topic)
            .map(|parts| {
                parts
                    .iter()
                    .flat_map(|records| records.iter().map(|r| r.payload.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Committed offsets of `group` on `topic`, summed over partitions.
    pub fn committed_total(&self, topic: &str, group: &str) -> u64 {
        let Ok(inner) = self.inner.lock() else {
            return 0;
        };
        inner
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .map(|g| g.committed.iter().sum())
            .unwrap_or(0)
    }

    fn append(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(QueueError::Connection("broker unavailable".to_string()));
        }

        let mut inner = self.lock()?;
        let partition = partition_for(key, inner.partitions);
        inner.topic_mut(topic)[partition as usize].push(Record {
            key: key.to_string(),
            payload,
        });
        drop(inner);

        self.notify.notify_waiters();
        Ok(())
    }

    fn try_fetch(&self, topic: &str, group: &str, member: &str) -> Result<Option<Delivery>, QueueError> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let partitions = inner.partitions;
        let log = inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions as usize]);
        let state = inner
            .groups
            .entry((topic.to_string(), group.to_string()))
            .or_insert_with(|| GroupState::new(partitions));

        let assigned = state.assigned(member, partitions);
        if assigned.is_empty() {
            return Ok(None);
        }

        let start = state.cursor.get(member).copied().unwrap_or(0);
        for i in 0..assigned.len() {
            let slot = (start + i) % assigned.len();
            let p = assigned[slot];
            let pi = p as usize;

            if state.in_flight[pi].is_some() {
                continue;
            }

            let offset = state.committed[pi];
            let Some(record) = log[pi].get(offset as usize) else {
                continue;
            };

            state.in_flight[pi] = Some(member.to_string());
            state.cursor.insert(member.to_string(), slot + 1);
            let attempt = state.attempts.entry((p, offset)).or_insert(0);
            *attempt += 1;

            debug!(topic, partition = p, offset, key = %record.key, attempt = *attempt, "delivering");

            return Ok(Some(Delivery {
                topic: topic.to_string(),
                partition: p,
                receipt: offset.to_string(),
                payload: record.payload.clone(),
                attempt: *attempt,
            }));
        }

        Ok(None)
    }

    fn commit_offset(&self, topic: &str, group: &str, delivery: &Delivery) -> Result<(), QueueError> {
        let offset: u64 = delivery
            .receipt
            .parse()
            .map_err(|_| QueueError::Command(format!("invalid receipt {}", delivery.receipt)))?;

        let mut inner = self.lock()?;
        let state = inner.group_mut(topic, group);
        let pi = delivery.partition as usize;
        if pi >= state.committed.len() {
            return Err(QueueError::Command(format!(
                "unknown partition {}",
                delivery.partition
            )));
        }

        if offset + 1 > state.committed[pi] {
            state.committed[pi] = offset + 1;
        }
        state.in_flight[pi] = None;
        state.attempts.remove(&(delivery.partition, offset));
        drop(inner);

        self.notify.notify_waiters();
        Ok(())
    }

    fn leave(&self, topic: &str, group: &str, member: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.group_mut(topic, group).leave(member);
        }
        self.notify.notify_waiters();
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Counts live publishing handles; decremented on drop.
#[derive(Debug)]
struct PublisherLease(Arc<AtomicUsize>);

impl PublisherLease {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for PublisherLease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct InMemoryPublisher {
    broker: InMemoryBroker,
    _lease: PublisherLease,
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.broker.append(topic, key, payload)
    }
}

#[derive(Debug)]
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    topic: String,
    group: String,
    member: String,
    closed: bool,
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }

        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a publish in between is not missed.
            let notified = self.broker.notify.notified();

            if let Some(delivery) = self.broker.try_fetch(&self.topic, &self.group, &self.member)? {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        self.broker.commit_offset(&self.topic, &self.group, delivery)
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        if !self.closed {
            self.closed = true;
            self.broker.leave(&self.topic, &self.group, &self.member);
        }
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        if !self.closed {
            self.broker.leave(&self.topic, &self.group, &self.member);
        }
    }
}

#[async_trait]
impl TaskQueue for InMemoryBroker {
    async fn publisher(&self) -> Result<Box<dyn Publisher>, QueueError> {
        Ok(Box::new(InMemoryPublisher {
            broker: self.clone(),
            _lease: PublisherLease::acquire(&self.open_publishers),
        }))
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Box<dyn Consumer>, QueueError> {
        {
            let mut inner = self.lock()?;
            inner.topic_mut(topic);
            inner.group_mut(topic, group).join(consumer);
        }
        self.notify.notify_waiters();

        Ok(Box::new(InMemoryConsumer {
            broker: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            member: consumer.to_string(),
            closed: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(20);

    async fn publish(broker: &InMemoryBroker, key: &str, body: &str) {
        let publisher = broker.publisher().await.unwrap();
        publisher
            .publish("tasks", key, body.as_bytes().to_vec())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delivers_in_partition_order_and_commits() {
        let broker = InMemoryBroker::new(1);
        let mut consumer = broker.subscribe("tasks", "g", "c1").await.unwrap();

        publish(&broker, "a", "one").await;
        publish(&broker, "a", "two").await;

        let first = consumer.poll(TICK).await.unwrap().unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(first.attempt, 1);

        // Partition is blocked until the in-flight delivery is committed.
        assert!(consumer.poll(TICK).await.unwrap().is_none());

        consumer.commit(&first).await.unwrap();
        let second = consumer.poll(TICK).await.unwrap().unwrap();
        assert_eq!(second.payload, b"two");
        consumer.commit(&second).await.unwrap();

        assert_eq!(broker.committed_total("tasks", "g"), 2);
    }

    #[tokio::test]
    async fn uncommitted_delivery_is_redelivered_after_crash() {
        let broker = InMemoryBroker::new(1);
        publish(&broker, "a", "payload").await;

        {
            let mut crashed = broker.subscribe("tasks", "g", "c1").await.unwrap();
            let d = crashed.poll(TICK).await.unwrap().unwrap();
            assert_eq!(d.attempt, 1);
            // dropped without commit
        }

        let mut replacement = broker.subscribe("tasks", "g", "c2").await.unwrap();
        let again = replacement.poll(TICK).await.unwrap().unwrap();
        assert_eq!(again.payload, b"payload");
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn group_members_get_disjoint_partitions() {
        let broker = InMemoryBroker::new(2);
        let mut c1 = broker.subscribe("tasks", "g", "c1").await.unwrap();
        let mut c2 = broker.subscribe("tasks", "g", "c2").await.unwrap();

        // Find keys landing on each partition.
        let k0 = (0..100).map(|i| i.to_string()).find(|k| partition_for(k, 2) == 0).unwrap();
        let k1 = (0..100).map(|i| i.to_string()).find(|k| partition_for(k, 2) == 1).unwrap();
        publish(&broker, &k0, "p0").await;
        publish(&broker, &k1, "p1").await;

        let d1 = c1.poll(TICK).await.unwrap().unwrap();
        let d2 = c2.poll(TICK).await.unwrap().unwrap();
        assert_ne!(d1.partition, d2.partition);
        assert!(c1.poll(TICK).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn poll_wakes_on_publish() {
        let broker = InMemoryBroker::new(1);
        let mut consumer = broker.subscribe("tasks", "g", "c1").await.unwrap();

        let b = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publish(&b, "k", "late").await;
        });

        let d = consumer.poll(Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(d.payload, b"late");
    }

    #[tokio::test]
    async fn publisher_handles_are_released_on_drop() {
        let broker = InMemoryBroker::new(1);
        let p1 = broker.publisher().await.unwrap();
        let p2 = broker.publisher().await.unwrap();
        assert_eq!(broker.open_publishers(), 2);
        drop(p1);
        drop(p2);
        assert_eq!(broker.open_publishers(), 0);
    }

    #[tokio::test]
    async fn publish_failure_is_reported() {
        let broker = InMemoryBroker::new(1);
        broker.set_publish_failure(true);
        let publisher = broker.publisher().await.unwrap();
        let err = publisher.publish("tasks", "k", vec![1]).await.unwrap_err();
        assert!(matches!(err, QueueError::Connection(_)));
        assert!(broker.messages("tasks").is_empty());
    }

    #[tokio::test]
    async fn closed_consumer_rejects_polls() {
        let broker = InMemoryBroker::new(1);
        let mut consumer = broker.subscribe("tasks", "g", "c1").await.unwrap();
        consumer.close().await.unwrap();
        assert_eq!(consumer.poll(TICK).await.unwrap_err(), QueueError::Closed);
    }
}
