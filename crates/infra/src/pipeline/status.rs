use std::sync::Arc;

use tracing::{debug, instrument, warn};

use admod_core::{ModerationTask, TaskId, TaskOutcome};
use admod_scoring::Prediction;

use crate::cache::PredictionCache;
use crate::error::PipelineError;
use crate::result_store::ResultStore;

/// Reads task status and warms the prediction cache from completed tasks.
pub struct StatusQuery {
    results: Arc<dyn ResultStore>,
    cache: Arc<dyn PredictionCache>,
}

impl StatusQuery {
    pub fn new(results: Arc<dyn ResultStore>, cache: Arc<dyn PredictionCache>) -> Self {
        Self { results, cache }
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    pub async fn get_result(&self, task_id: TaskId) -> Result<ModerationTask, PipelineError> {
        let task = self
            .results
            .get(task_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("task {task_id}")))?;

        // Only completed predictions are cached; a failed task has nothing to reuse.
        if let Some(TaskOutcome::Completed {
            is_violation,
            probability,
        }) = task.outcome()
        {
            let prediction = Prediction {
                is_violation,
                probability,
            };
            self.warm_cache(&task, &prediction).await;
        }

        Ok(task)
    }

    /// Best-effort cache write that cannot outlive a concurrent close.
    ///
    /// Close deletes the tasks before the cache entry. If the task is gone
    /// once our write has landed, that close may already have run its cache
    /// delete, so the entry is removed again here.
    async fn warm_cache(&self, task: &ModerationTask, prediction: &Prediction) {
        let subject_id = task.subject_id;
        if let Err(err) = self.cache.set(subject_id, prediction).await {
            warn!(subject_id = %subject_id, error = %err, "cache write failed");
            return;
        }

        match self.results.get(task.task_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(subject_id = %subject_id, "task removed while warming cache, evicting");
                if let Err(err) = self.cache.delete(subject_id).await {
                    warn!(subject_id = %subject_id, error = %err, "cache delete failed; entry will expire");
                }
            }
            Err(err) => warn!(subject_id = %subject_id, error = %err, "could not re-check task after cache write"),
        }
    }
}
