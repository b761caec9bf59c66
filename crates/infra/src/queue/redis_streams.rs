//! Redis Streams-backed task queue (durable, at-least-once delivery).
//!
//! ## Layout
//!
//! - **Partitions**: topic `t` with `n` partitions is stored as the streams
//!   `t:0 .. t:{n-1}`; a message lands on `partition_for(key, n)`.
//! - **Consumer groups**: created per partition stream with `MKSTREAM`.
//! - **Commit**: `XACK` of the delivered entry.
//! - **Recovery**: a consumer first re-reads its own pending entries (id `0`)
//!   so work delivered before a crash is redelivered on restart, then
//!   switches to new entries (`>`).
//! - **Reclaim**: on start and then every `claim_idle`, `XAUTOCLAIM` moves
//!   entries pending longer than `claim_idle` under any other consumer (one
//!   that crashed and never came back under the same name) into this
//!   consumer's pending list, which is then re-read.
//!
//! Each publisher lease owns its own connection, closed when the lease drops.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamReadReply;
use tracing::{debug, info, instrument, warn};

use admod_events::{Consumer, Delivery, Publisher, QueueError, TaskQueue, partition_for};

const PAYLOAD_FIELD: &str = "payload";
const KEY_FIELD: &str = "key";
const CLAIM_BATCH: u32 = 100;
const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RedisStreamsQueue {
    client: Arc<redis::Client>,
    partitions: u32,
    claim_idle: Duration,
}

impl RedisStreamsQueue {
    /// Create a queue over `redis_url` (e.g. "redis://localhost:6379/1").
    pub fn new(redis_url: impl AsRef<str>, partitions: u32) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            partitions: partitions.max(1),
            claim_idle: DEFAULT_CLAIM_IDLE,
        })
    }

    /// Minimum idle time before another consumer's pending entry is taken over.
    ///
    /// Must exceed the longest time a live worker holds one message.
    pub fn with_claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    fn stream_key(topic: &str, partition: u32) -> String {
        format!("{topic}:{partition}")
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))
    }
}

#[async_trait]
impl TaskQueue for RedisStreamsQueue {
    async fn publisher(&self) -> Result<Box<dyn Publisher>, QueueError> {
        Ok(Box::new(RedisStreamsPublisher {
            conn: self.connection().await?,
            partitions: self.partitions,
        }))
    }

    #[instrument(skip(self), err)]
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Box<dyn Consumer>, QueueError> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = (0..self.partitions)
            .map(|p| Self::stream_key(topic, p))
            .collect();

        for key in &keys {
            // "0": a new group starts from the beginning of the stream.
            let created: redis::RedisResult<String> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(key)
                .arg(group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            if let Err(e) = created {
                if e.code() != Some("BUSYGROUP") {
                    return Err(QueueError::ConsumerGroup(format!(
                        "XGROUP CREATE {key} failed: {e}"
                    )));
                }
            }
        }

        Ok(Box::new(RedisStreamsConsumer {
            conn,
            topic: topic.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            keys,
            recovering: true,
            claim_idle: self.claim_idle,
            last_claim: None,
            buffer: VecDeque::new(),
            closed: false,
        }))
    }
}

struct RedisStreamsPublisher {
    conn: MultiplexedConnection,
    partitions: u32,
}

#[async_trait]
impl Publisher for RedisStreamsPublisher {
    #[instrument(skip(self, payload), fields(payload_len = payload.len()), err)]
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        let partition = partition_for(key, self.partitions);
        let stream = RedisStreamsQueue::stream_key(topic, partition);
        let mut conn = self.conn.clone();

        let _: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg(KEY_FIELD)
            .arg(key)
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }
}

struct RedisStreamsConsumer {
    conn: MultiplexedConnection,
    topic: String,
    group: String,
    consumer: String,
    keys: Vec<String>,
    recovering: bool,
    claim_idle: Duration,
    last_claim: Option<Instant>,
    buffer: VecDeque<Delivery>,
    closed: bool,
}

impl RedisStreamsConsumer {
    fn claim_due(&self) -> bool {
        self.last_claim.is_none_or(|at| at.elapsed() >= self.claim_idle)
    }

    /// Take over entries left pending by other consumers; returns how many.
    async fn reclaim(&mut self) -> Result<usize, QueueError> {
        let min_idle = u64::try_from(self.claim_idle.as_millis()).unwrap_or(u64::MAX);
        let mut claimed = 0;

        for key in &self.keys {
            let mut cursor = "0-0".to_string();
            loop {
                let reply: Vec<redis::Value> = redis::cmd("XAUTOCLAIM")
                    .arg(key)
                    .arg(&self.group)
                    .arg(&self.consumer)
                    .arg(min_idle)
                    .arg(&cursor)
                    .arg("COUNT")
                    .arg(CLAIM_BATCH)
                    .arg("JUSTID")
                    .query_async(&mut self.conn)
                    .await
                    .map_err(|e| QueueError::Command(format!("XAUTOCLAIM failed: {e}")))?;

                let (next, ids) = parse_autoclaim(&reply)?;
                if !ids.is_empty() {
                    info!(stream = %key, consumer = %self.consumer, count = ids.len(), "reclaimed idle entries");
                }
                claimed += ids.len();

                if next == "0-0" {
                    break;
                }
                cursor = next;
            }
        }

        self.last_claim = Some(Instant::now());
        Ok(claimed)
    }

    /// One XREADGROUP round over every partition stream.
    async fn read(&mut self, timeout: Duration) -> Result<(), QueueError> {
        if self.claim_due() && self.reclaim().await? > 0 {
            self.recovering = true;
        }

        let start_id = if self.recovering { "0" } else { ">" };

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1);
        if !self.recovering {
            // BLOCK 0 would wait forever.
            cmd.arg("BLOCK").arg(timeout.as_millis().max(1) as u64);
        }
        cmd.arg("STREAMS").arg(&self.keys);
        for _ in &self.keys {
            cmd.arg(start_id);
        }

        let reply: Option<StreamReadReply> = cmd
            .query_async(&mut self.conn)
            .await
            .map_err(|e| QueueError::Command(format!("XREADGROUP failed: {e}")))?;

        let mut found = false;
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            let partition = stream
                .key
                .rsplit(':')
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .unwrap_or(0);

            for entry in stream.ids {
                found = true;
                match entry.get::<Vec<u8>>(PAYLOAD_FIELD) {
                    Some(payload) => self.buffer.push_back(Delivery {
                        topic: self.topic.clone(),
                        partition,
                        receipt: entry.id,
                        payload,
                        // Recovered entries were delivered at least once before.
                        attempt: if self.recovering { 2 } else { 1 },
                    }),
                    None => {
                        // Trimmed or malformed entry: nothing to process.
                        warn!(stream = %stream.key, id = %entry.id, "stream entry without payload, acknowledging");
                        self.ack(&stream.key, &entry.id).await?;
                    }
                }
            }
        }

        if self.recovering && !found {
            debug!(consumer = %self.consumer, "pending entries drained");
            self.recovering = false;
        }
        Ok(())
    }

    async fn ack(&mut self, key: &str, id: &str) -> Result<(), QueueError> {
        let _: u64 = redis::cmd("XACK")
            .arg(key)
            .arg(&self.group)
            .arg(id)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| QueueError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }
}

/// `XAUTOCLAIM … JUSTID` replies `[next-cursor, [ids…]]`, plus deleted ids on Redis 7.
fn parse_autoclaim(reply: &[redis::Value]) -> Result<(String, Vec<String>), QueueError> {
    let [next, ids, ..] = reply else {
        return Err(QueueError::Command(format!(
            "unexpected XAUTOCLAIM reply with {} elements",
            reply.len()
        )));
    };
    let next: String = redis::from_redis_value(next)
        .map_err(|e| QueueError::Command(format!("XAUTOCLAIM cursor: {e}")))?;
    let ids: Vec<String> = redis::from_redis_value(ids)
        .map_err(|e| QueueError::Command(format!("XAUTOCLAIM ids: {e}")))?;
    Ok((next, ids))
}

#[async_trait]
impl Consumer for RedisStreamsConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        if self.buffer.is_empty() {
            self.read(timeout).await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        let key = RedisStreamsQueue::stream_key(&delivery.topic, delivery.partition);
        self.ack(&key, &delivery.receipt).await
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        // Pending entries stay owned by this consumer name: re-read when it
        // starts again, or reclaimed by another member after `claim_idle`.
        self.closed = true;
        self.buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_delivery(consumer: &mut Box<dyn Consumer>) -> Delivery {
        for _ in 0..20 {
            if let Some(delivery) = consumer.poll(Duration::from_millis(50)).await.unwrap() {
                return delivery;
            }
        }
        panic!("no delivery within the polling budget");
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn entry_left_by_crashed_consumer_is_reclaimed() {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set");
        let topic = format!("reclaim-{}", chrono::Utc::now().timestamp_micros());
        let queue = RedisStreamsQueue::new(&url, 1)
            .unwrap()
            .with_claim_idle(Duration::from_millis(100));

        queue
            .publisher()
            .await
            .unwrap()
            .publish(&topic, "ad-1", b"task".to_vec())
            .await
            .unwrap();

        // Receives the entry and dies before XACK, never to return under this name.
        let mut crashed = queue.subscribe(&topic, "workers", "worker-a").await.unwrap();
        let first = next_delivery(&mut crashed).await;
        assert_eq!(first.attempt, 1);
        drop(crashed);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut survivor = queue.subscribe(&topic, "workers", "worker-b").await.unwrap();
        let again = next_delivery(&mut survivor).await;
        assert_eq!(again.payload, b"task".to_vec());
        assert_eq!(again.receipt, first.receipt);
        assert_eq!(again.attempt, 2);
        survivor.commit(&again).await.unwrap();

        assert!(survivor.poll(Duration::from_millis(50)).await.unwrap().is_none());
    }
}
