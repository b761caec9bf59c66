//! Task queue abstraction (mechanics only).
//!
//! The pipeline talks to its broker through three seams:
//!
//! - [`TaskQueue`]: the broker connection, owned by the process and passed to
//!   components at construction.
//! - [`Publisher`]: a scoped publishing handle. It is released when dropped, so
//!   acquiring one per unit of work cannot leak connections across a
//!   long-running consume loop.
//! - [`Consumer`]: a member of a named consumer group. The broker assigns it a
//!   disjoint set of partitions.
//!
//! ## Delivery semantics
//!
//! - **At-least-once**: a delivery that is never committed is redelivered
//!   (after a rebalance or a consumer restart). Handlers must be idempotent.
//! - **Per-partition order**: within one partition deliveries arrive in
//!   publish order, and a consumer has at most one uncommitted delivery per
//!   partition at a time.
//! - **No cross-partition order**.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{DlqMessage, QueueMessage};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("consumer group error: {0}")]
    ConsumerGroup(String),

    #[error("consumer is closed")]
    Closed,
}

/// A message handed to a consumer, not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    /// Broker-specific position used to commit this delivery.
    pub receipt: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}

/// Scoped publishing handle.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` to `topic`. Returns once the broker acknowledged it.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), QueueError>;
}

/// Consumer-group member.
#[async_trait]
pub trait Consumer: Send {
    /// Wait up to `timeout` for the next delivery.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Mark a delivery as processed; it will not be redelivered.
    async fn commit(&mut self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Leave the group. Uncommitted deliveries go back to the group.
    async fn close(&mut self) -> Result<(), QueueError>;
}

/// Broker connection.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Acquire a publishing handle; it is released when dropped.
    async fn publisher(&self) -> Result<Box<dyn Publisher>, QueueError>;

    /// Join consumer group `group` on `topic` as member `consumer`.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Box<dyn Consumer>, QueueError>;
}

/// Typed publishing helpers over any [`Publisher`].
#[async_trait]
pub trait PublisherExt: Publisher {
    async fn publish_task(&self, topic: &str, message: &QueueMessage) -> Result<(), QueueError> {
        let payload = message.encode()?;
        self.publish(topic, &message.partition_key(), payload).await
    }

    async fn publish_dead_letter(&self, topic: &str, message: &DlqMessage) -> Result<(), QueueError> {
        let payload = message.encode()?;
        let key = message
            .original_message
            .get("subject_id")
            .or_else(|| message.original_message.get("item_id"))
            .map(|v| v.to_string())
            .unwrap_or_default();
        self.publish(topic, &key, payload).await
    }
}

impl<P: Publisher + ?Sized> PublisherExt for P {}

/// Stable partition assignment for a key (FNV-1a).
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash % partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitioning_is_stable_and_bounded() {
        for key in ["1", "42", "9999", ""] {
            let p = partition_for(key, 4);
            assert!(p < 4);
            assert_eq!(p, partition_for(key, 4));
        }
        assert_eq!(partition_for("anything", 1), 0);
    }
}
