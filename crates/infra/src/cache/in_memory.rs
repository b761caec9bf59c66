use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;

use admod_core::SubjectId;
use admod_scoring::Prediction;

use super::{CacheError, PredictionCache};

/// TTL cache held in process memory.
pub struct InMemoryPredictionCache {
    entries: Cache<SubjectId, Prediction>,
    ttl: Duration,
    fail: AtomicBool,
}

impl InMemoryPredictionCache {
    const DEFAULT_CAPACITY: u64 = 100_000;

    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(Self::DEFAULT_CAPACITY)
                .time_to_live(ttl)
                .build(),
            ttl,
            fail: AtomicBool::new(false),
        }
    }

    /// Make every subsequent operation fail, as an unreachable cache would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("cache unavailable".into()));
        }
        Ok(())
    }
}

impl core::fmt::Debug for InMemoryPredictionCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryPredictionCache")
            .field("entries", &self.entries.entry_count())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[async_trait]
impl PredictionCache for InMemoryPredictionCache {
    async fn get(&self, subject_id: SubjectId) -> Result<Option<Prediction>, CacheError> {
        self.check()?;
        Ok(self.entries.get(&subject_id))
    }

    async fn set(&self, subject_id: SubjectId, prediction: &Prediction) -> Result<(), CacheError> {
        self.check()?;
        self.entries.insert(subject_id, *prediction);
        Ok(())
    }

    async fn delete(&self, subject_id: SubjectId) -> Result<(), CacheError> {
        self.check()?;
        self.entries.invalidate(&subject_id);
        Ok(())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction() -> Prediction {
        Prediction {
            is_violation: true,
            probability: 0.8,
        }
    }

    #[tokio::test]
    async fn set_get_delete() {
        let cache = InMemoryPredictionCache::new(Duration::from_secs(60));
        let id = SubjectId::new(1);

        assert_eq!(cache.get(id).await.unwrap(), None);
        cache.set(id, &prediction()).await.unwrap();
        assert_eq!(cache.get(id).await.unwrap(), Some(prediction()));

        cache.delete(id).await.unwrap();
        assert_eq!(cache.get(id).await.unwrap(), None);
        // Deleting a missing key is fine.
        cache.delete(id).await.unwrap();
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryPredictionCache::new(Duration::from_millis(50));
        let id = SubjectId::new(2);
        cache.set(id, &prediction()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unavailable_cache_reports_errors() {
        let cache = InMemoryPredictionCache::new(Duration::from_secs(60));
        cache.set_unavailable(true);
        assert!(cache.get(SubjectId::new(1)).await.is_err());
        assert!(cache.set(SubjectId::new(1), &prediction()).await.is_err());
    }
}
