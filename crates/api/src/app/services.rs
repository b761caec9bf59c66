//! Backend selection and pipeline construction.
//!
//! `USE_PERSISTENT_STORES=false` (default): in-memory directory, result
//! store, cache and broker, with a worker embedded in the API process so the
//! async path completes end to end.
//!
//! `USE_PERSISTENT_STORES=true`: Postgres directory + result store, Redis
//! cache and Redis Streams queue. The worker runs as `admod-worker`.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::info;

use admod_events::{InMemoryBroker, Publisher, TaskQueue};
use admod_infra::PipelineConfig;
use admod_infra::cache::InMemoryPredictionCache;
use admod_infra::directory::InMemoryDirectory;
use admod_infra::pipeline::{Backends, ModerationService};
use admod_infra::result_store::InMemoryResultStore;
use admod_infra::workers::{ModerationWorker, WorkerHandle, WorkerSettings, WorkerStats};
use admod_scoring::{LogisticScorer, ModerationModel, ModerationPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    InMemory,
    Persistent,
}

impl StoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreMode::InMemory => "in_memory",
            StoreMode::Persistent => "persistent",
        }
    }
}

pub struct AppServices {
    pub moderation: ModerationService,
    pub mode: StoreMode,
    embedded_worker: Mutex<Option<WorkerHandle>>,
}

impl AppServices {
    /// Stop the embedded worker, if any.
    pub async fn shutdown(&self) -> Option<WorkerStats> {
        let handle = self.embedded_worker.lock().await.take()?;
        Some(handle.shutdown().await)
    }
}

/// Backends plus the queue they publish to.
struct Pipeline {
    backends: Backends,
    queue: Arc<dyn TaskQueue>,
    mode: StoreMode,
}

pub fn build_model(config: &PipelineConfig) -> anyhow::Result<ModerationModel> {
    let policy = ModerationPolicy::new(config.violation_threshold)?;
    Ok(ModerationModel::new(Arc::new(LogisticScorer::default()), policy))
}

async fn build_pipeline(config: &PipelineConfig) -> anyhow::Result<Pipeline> {
    if config.use_persistent_stores {
        return persistent::build(config).await;
    }

    Ok(Pipeline {
        backends: Backends {
            directory: Arc::new(InMemoryDirectory::new()),
            results: Arc::new(InMemoryResultStore::new()),
            cache: Arc::new(InMemoryPredictionCache::new(config.prediction_ttl)),
        },
        queue: Arc::new(InMemoryBroker::new(config.partitions)),
        mode: StoreMode::InMemory,
    })
}

pub async fn build_services(config: &PipelineConfig) -> anyhow::Result<AppServices> {
    let Pipeline {
        backends,
        queue,
        mode,
    } = build_pipeline(config).await?;

    let publisher: Arc<dyn Publisher> = Arc::from(
        queue
            .publisher()
            .await
            .context("failed to acquire task publisher")?,
    );

    let embedded_worker = match mode {
        StoreMode::InMemory => {
            let worker = ModerationWorker::new(
                Arc::clone(&backends.directory),
                Arc::clone(&backends.results),
                Arc::clone(&queue),
                build_model(config)?,
                WorkerSettings::from_config(config),
            );
            Some(worker.start().await.context("failed to start embedded worker")?)
        }
        StoreMode::Persistent => None,
    };

    info!(mode = mode.as_str(), topic = %config.topic, "services ready");

    Ok(AppServices {
        moderation: ModerationService::new(
            backends,
            publisher,
            config.topic.clone(),
            build_model(config)?,
        ),
        mode,
        embedded_worker: Mutex::new(embedded_worker),
    })
}

/// Build a standalone worker; only meaningful against shared backends.
pub async fn build_worker(config: &PipelineConfig) -> anyhow::Result<ModerationWorker> {
    if !config.use_persistent_stores {
        anyhow::bail!(
            "admod-worker needs USE_PERSISTENT_STORES=true; in-memory mode runs the worker inside admod-api"
        );
    }

    let Pipeline {
        backends, queue, ..
    } = build_pipeline(config).await?;

    Ok(ModerationWorker::new(
        backends.directory,
        backends.results,
        queue,
        build_model(config)?,
        WorkerSettings::from_config(config),
    ))
}

#[cfg(feature = "redis")]
mod persistent {
    use std::sync::Arc;

    use anyhow::Context;

    use admod_infra::PipelineConfig;
    use admod_infra::cache::RedisPredictionCache;
    use admod_infra::db;
    use admod_infra::directory::PostgresDirectory;
    use admod_infra::pipeline::Backends;
    use admod_infra::queue::RedisStreamsQueue;
    use admod_infra::result_store::PostgresResultStore;

    use super::{Pipeline, StoreMode};

    pub(super) async fn build(config: &PipelineConfig) -> anyhow::Result<Pipeline> {
        let database_url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;

        let pool = db::connect(database_url, 10)
            .await
            .context("failed to connect to Postgres")?;
        db::ensure_schema(&pool)
            .await
            .context("failed to prepare database schema")?;

        let cache = RedisPredictionCache::connect(&config.redis_url, config.prediction_ttl)
            .await
            .context("failed to connect to Redis cache")?;
        let queue = RedisStreamsQueue::new(&config.redis_url, config.partitions)
            .context("invalid Redis URL for task queue")?
            .with_claim_idle(config.claim_idle);

        Ok(Pipeline {
            backends: Backends {
                directory: Arc::new(PostgresDirectory::new(pool.clone())),
                results: Arc::new(PostgresResultStore::new(pool)),
                cache: Arc::new(cache),
            },
            queue: Arc::new(queue),
            mode: StoreMode::Persistent,
        })
    }
}

#[cfg(not(feature = "redis"))]
mod persistent {
    use admod_infra::PipelineConfig;

    use super::Pipeline;

    pub(super) async fn build(_config: &PipelineConfig) -> anyhow::Result<Pipeline> {
        anyhow::bail!("persistent stores require the `redis` feature")
    }
}
