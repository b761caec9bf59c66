use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::instrument;

use admod_core::SubjectId;
use admod_scoring::Prediction;

use super::{CacheError, PredictionCache, cache_key};

/// Redis cache storing `prediction:{id}` as JSON with `SET .. EX`.
#[derive(Clone)]
pub struct RedisPredictionCache {
    conn: MultiplexedConnection,
    ttl: Duration,
}

impl RedisPredictionCache {
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| CacheError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { conn, ttl })
    }
}

impl core::fmt::Debug for RedisPredictionCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisPredictionCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn command_error(op: &str, err: redis::RedisError) -> CacheError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
        CacheError::Connection(format!("{op}: {err}"))
    } else {
        CacheError::Command(format!("{op}: {err}"))
    }
}

#[async_trait]
impl PredictionCache for RedisPredictionCache {
    #[instrument(skip(self), fields(subject_id = %subject_id), err)]
    async fn get(&self, subject_id: SubjectId) -> Result<Option<Prediction>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(cache_key(subject_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("GET", e))?;

        raw.map(|json| serde_json::from_str(&json).map_err(|e| CacheError::Codec(e.to_string())))
            .transpose()
    }

    #[instrument(skip(self, prediction), fields(subject_id = %subject_id), err)]
    async fn set(&self, subject_id: SubjectId, prediction: &Prediction) -> Result<(), CacheError> {
        let json = serde_json::to_string(prediction).map_err(|e| CacheError::Codec(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(cache_key(subject_id))
            .arg(json)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("SET", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(subject_id = %subject_id), err)]
    async fn delete(&self, subject_id: SubjectId) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(cache_key(subject_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("DEL", e))?;
        Ok(())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn set_get_delete_against_redis() {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set");
        let cache = RedisPredictionCache::connect(&url, Duration::from_secs(30))
            .await
            .unwrap();
        let subject = SubjectId::new(987_654_321);
        let prediction = Prediction {
            is_violation: false,
            probability: 0.25,
        };

        cache.set(subject, &prediction).await.unwrap();
        assert_eq!(cache.get(subject).await.unwrap(), Some(prediction));

        cache.delete(subject).await.unwrap();
        assert_eq!(cache.get(subject).await.unwrap(), None);
    }
}
