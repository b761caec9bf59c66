//! Wire messages carried on the primary and dead-letter topics.
//!
//! Both are JSON-encoded, immutable and broker-owned; nothing here is
//! persisted beyond the broker's own retention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use admod_core::{SubjectId, TaskId};

use crate::queue::QueueError;

/// Primary-topic message: "score subject `subject_id` for task `task_id`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    #[serde(alias = "item_id")]
    pub subject_id: SubjectId,
    pub task_id: TaskId,
    pub timestamp: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(subject_id: SubjectId, task_id: TaskId) -> Self {
        Self {
            subject_id,
            task_id,
            timestamp: Utc::now(),
        }
    }

    /// Partitioning key: all tasks for one subject land on one partition.
    pub fn partition_key(&self) -> String {
        self.subject_id.to_string()
    }

    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, QueueError> {
        serde_json::from_slice(payload).map_err(|e| QueueError::Deserialization(e.to_string()))
    }
}

/// Dead-letter message: the original payload plus why it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqMessage {
    pub original_message: JsonValue,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

impl DlqMessage {
    pub fn new(original_message: JsonValue, error: impl Into<String>, retry_count: u32) -> Self {
        Self {
            original_message,
            error: error.into(),
            timestamp: Utc::now(),
            retry_count,
        }
    }

    /// Dead-letter a payload that could not be decoded; keeps the raw text.
    pub fn unparseable(raw: &[u8], error: impl Into<String>) -> Self {
        Self::new(
            JsonValue::String(String::from_utf8_lossy(raw).into_owned()),
            error,
            0,
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, QueueError> {
        serde_json::from_slice(payload).map_err(|e| QueueError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_legacy_item_id_field() {
        let raw = br#"{"item_id": 7, "task_id": 3, "timestamp": "2025-01-01T00:00:00Z"}"#;
        let msg = QueueMessage::decode(raw).unwrap();
        assert_eq!(msg.subject_id, SubjectId::new(7));
        assert_eq!(msg.task_id, TaskId::new(3));
    }

    #[test]
    fn encodes_subject_and_task_ids() {
        let msg = QueueMessage::new(SubjectId::new(12), TaskId::new(99));
        let json: JsonValue = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["subject_id"], 12);
        assert_eq!(json["task_id"], 99);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            QueueMessage::decode(b"not json"),
            Err(QueueError::Deserialization(_))
        ));
        assert!(QueueMessage::decode(br#"{"task_id": 1}"#).is_err());
    }

    #[test]
    fn unparseable_dlq_keeps_raw_text() {
        let dlq = DlqMessage::unparseable(b"{broken", "expected value");
        assert_eq!(dlq.original_message, JsonValue::String("{broken".to_string()));
        assert_eq!(dlq.retry_count, 0);
    }
}
