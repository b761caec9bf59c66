use std::sync::Arc;

use tracing::{error, info, instrument};

use admod_core::{SubjectId, TaskId, TaskStatus};
use admod_events::{Publisher, PublisherExt, QueueMessage};

use crate::directory::SubjectDirectory;
use crate::error::PipelineError;
use crate::result_store::ResultStore;

/// Accepted submission, as returned to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedTask {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

/// Creates a pending task and enqueues it for the worker.
pub struct TaskProducer {
    directory: Arc<dyn SubjectDirectory>,
    results: Arc<dyn ResultStore>,
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl TaskProducer {
    pub fn new(
        directory: Arc<dyn SubjectDirectory>,
        results: Arc<dyn ResultStore>,
        publisher: Arc<dyn Publisher>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            results,
            publisher,
            topic: topic.into(),
        }
    }

    /// Submit `subject_id` for asynchronous scoring.
    ///
    /// If the publish fails the pending row is deleted again, so no task is
    /// left that no worker will ever pick up.
    #[instrument(skip(self), fields(subject_id = %subject_id), err)]
    pub async fn submit(&self, subject_id: SubjectId) -> Result<SubmittedTask, PipelineError> {
        if self.directory.get_ad(subject_id).await?.is_none() {
            return Err(PipelineError::not_found(format!("ad {subject_id}")));
        }

        let task = self.results.create_pending(subject_id).await?;
        let message = QueueMessage::new(subject_id, task.task_id);

        if let Err(publish_err) = self.publisher.publish_task(&self.topic, &message).await {
            if let Err(delete_err) = self.results.delete(task.task_id).await {
                error!(
                    task_id = %task.task_id,
                    error = %delete_err,
                    "could not remove pending task after publish failure"
                );
            }
            return Err(PipelineError::Transient(format!(
                "could not enqueue task {}: {publish_err}",
                task.task_id
            )));
        }

        info!(task_id = %task.task_id, topic = %self.topic, "task enqueued");
        Ok(SubmittedTask {
            task_id: task.task_id,
            status: task.status,
        })
    }
}
