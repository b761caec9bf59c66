//! Short-lived prediction cache keyed by subject.
//!
//! Entries expire after a fixed TTL chosen when the cache is built. The cache
//! is never authoritative: callers treat every failure as a miss.

mod in_memory;
#[cfg(feature = "redis")]
mod redis_cache;

pub use in_memory::InMemoryPredictionCache;
#[cfg(feature = "redis")]
pub use redis_cache::RedisPredictionCache;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use admod_core::SubjectId;
use admod_scoring::Prediction;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command error: {0}")]
    Command(String),

    #[error("cache codec error: {0}")]
    Codec(String),
}

/// Cache key for a subject's prediction.
pub fn cache_key(subject_id: SubjectId) -> String {
    format!("prediction:{subject_id}")
}

#[async_trait]
pub trait PredictionCache: Send + Sync {
    async fn get(&self, subject_id: SubjectId) -> Result<Option<Prediction>, CacheError>;

    /// Store a prediction; it expires after [`PredictionCache::ttl`].
    async fn set(&self, subject_id: SubjectId, prediction: &Prediction) -> Result<(), CacheError>;

    async fn delete(&self, subject_id: SubjectId) -> Result<(), CacheError>;

    fn ttl(&self) -> Duration;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        assert_eq!(cache_key(SubjectId::new(42)), "prediction:42");
    }
}
