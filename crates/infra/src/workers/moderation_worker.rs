//! Queue consumer that scores subjects and records task outcomes.
//!
//! Per delivery:
//!
//! 1. decode the [`QueueMessage`] (undecodable payloads are dropped, or
//!    dead-lettered when configured)
//! 2. resolve the ad and its seller, score, write `completed`
//! 3. transient failures are retried with backoff; business failures and
//!    exhausted retries write `failed` and publish a [`DlqMessage`]
//! 4. commit the delivery
//!
//! The delivery is committed only after step 2 or 3 has run, so a crash
//! mid-message leads to redelivery rather than a silently lost task.
//! Redelivery is safe: re-applying a terminal outcome is a no-op.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use admod_core::{TaskOutcome, TaskId};
use admod_events::{Consumer, DlqMessage, PublisherExt, QueueError, QueueMessage, TaskQueue};
use admod_scoring::{AdAttributes, ModerationModel, Prediction};

use crate::config::PipelineConfig;
use crate::directory::SubjectDirectory;
use crate::error::PipelineError;
use crate::result_store::ResultStore;

use super::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub topic: String,
    pub dlq_topic: String,
    pub group: String,
    pub consumer_name: String,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub dlq_unparseable: bool,
}

impl WorkerSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            topic: config.topic.clone(),
            dlq_topic: config.dlq_topic.clone(),
            group: config.consumer_group.clone(),
            consumer_name: config.consumer_name.clone(),
            poll_interval: config.poll_interval,
            retry: config.retry_policy(),
            dlq_unparseable: config.dlq_unparseable,
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    Completed(Prediction),
    /// Recorded as `failed` and dead-lettered after `retries` retries.
    Failed { error: String, retries: u32 },
    /// Undecodable payload; no task could be identified.
    Dropped,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub delivered: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub commit_errors: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &HandleOutcome) {
        self.delivered += 1;
        match outcome {
            HandleOutcome::Completed(_) => self.completed += 1,
            HandleOutcome::Failed { .. } => self.failed += 1,
            HandleOutcome::Dropped => self.dropped += 1,
        }
    }
}

/// Handle to control and join a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Request graceful shutdown and wait for the in-flight message to finish.
    pub async fn shutdown(mut self) -> WorkerStats {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                error!(error = %err, "moderation worker task panicked");
            }
        }
        self.stats()
    }
}

impl Drop for WorkerHandle {
    /// Dropped without `shutdown`: the task is aborted mid-message, leaving
    /// the delivery uncommitted for another group member.
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

pub struct ModerationWorker {
    directory: Arc<dyn SubjectDirectory>,
    results: Arc<dyn ResultStore>,
    queue: Arc<dyn TaskQueue>,
    model: ModerationModel,
    settings: WorkerSettings,
}

impl core::fmt::Debug for ModerationWorker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModerationWorker")
            .field("model", &self.model)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ModerationWorker {
    pub fn new(
        directory: Arc<dyn SubjectDirectory>,
        results: Arc<dyn ResultStore>,
        queue: Arc<dyn TaskQueue>,
        model: ModerationModel,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            directory,
            results,
            queue,
            model,
            settings,
        }
    }

    /// Join the consumer group and spawn the consume loop.
    pub async fn start(self) -> Result<WorkerHandle, QueueError> {
        let consumer = self
            .queue
            .subscribe(
                &self.settings.topic,
                &self.settings.group,
                &self.settings.consumer_name,
            )
            .await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));

        info!(
            topic = %self.settings.topic,
            group = %self.settings.group,
            consumer = %self.settings.consumer_name,
            scorer = %self.model.scorer_name(),
            "moderation worker started"
        );

        let join = tokio::spawn(self.run(consumer, shutdown_rx, Arc::clone(&stats)));

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    async fn run(
        self,
        mut consumer: Box<dyn Consumer>,
        shutdown: watch::Receiver<bool>,
        stats: Arc<Mutex<WorkerStats>>,
    ) {
        let tick = self.settings.poll_interval;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match consumer.poll(tick).await {
                Ok(Some(delivery)) => {
                    if delivery.attempt > 1 {
                        debug!(
                            partition = delivery.partition,
                            attempt = delivery.attempt,
                            "redelivered message"
                        );
                    }

                    let outcome = self.handle_payload(&delivery.payload).await;
                    let commit = consumer.commit(&delivery).await;

                    if let Ok(mut s) = stats.lock() {
                        s.record(&outcome);
                        if commit.is_err() {
                            s.commit_errors += 1;
                        }
                    }
                    if let Err(err) = commit {
                        warn!(error = %err, partition = delivery.partition, "commit failed; message will be redelivered");
                    }
                }
                Ok(None) => continue,
                Err(QueueError::Closed) => break,
                Err(err) => {
                    error!(error = %err, "poll failed");
                    tokio::time::sleep(tick).await;
                }
            }
        }

        if let Err(err) = consumer.close().await {
            warn!(error = %err, "consumer close failed");
        }
        info!(consumer = %self.settings.consumer_name, "moderation worker stopped");
    }

    /// Process one raw payload to a terminal outcome.
    ///
    /// Never fails: every error path is recorded in the result store, the
    /// DLQ, or the log.
    #[instrument(skip(self, payload), fields(payload_len = payload.len()))]
    pub async fn handle_payload(&self, payload: &[u8]) -> HandleOutcome {
        let message = match QueueMessage::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                self.handle_unparseable(payload, &err).await;
                return HandleOutcome::Dropped;
            }
        };

        match self.process_with_retry(&message).await {
            Ok(prediction) => {
                info!(
                    task_id = %message.task_id,
                    subject_id = %message.subject_id,
                    is_violation = prediction.is_violation,
                    probability = prediction.probability,
                    "task completed"
                );
                HandleOutcome::Completed(prediction)
            }
            Err((err, retries)) => {
                let error = err.to_string();
                error!(
                    task_id = %message.task_id,
                    subject_id = %message.subject_id,
                    retries,
                    error = %error,
                    "task failed"
                );
                self.record_failure(message.task_id, &error).await;

                let original = serde_json::from_slice::<serde_json::Value>(payload)
                    .or_else(|_| serde_json::to_value(&message))
                    .unwrap_or_default();
                self.dead_letter(DlqMessage::new(original, error.clone(), retries))
                    .await;

                HandleOutcome::Failed { error, retries }
            }
        }
    }

    async fn process_with_retry(
        &self,
        message: &QueueMessage,
    ) -> Result<Prediction, (PipelineError, u32)> {
        let policy = &self.settings.retry;
        let mut retries = 0;

        loop {
            match self.process(message).await {
                Ok(prediction) => return Ok(prediction),
                Err(err) if err.is_transient() && policy.should_retry(retries) => {
                    retries += 1;
                    let delay = policy.delay_for_retry(retries);
                    debug!(task_id = %message.task_id, retries, ?delay, error = %err, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err((err, retries)),
            }
        }
    }

    async fn process(&self, message: &QueueMessage) -> Result<Prediction, PipelineError> {
        let ad = self
            .directory
            .get_ad(message.subject_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("ad {}", message.subject_id)))?;

        let seller = self
            .directory
            .get_seller(ad.seller_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("seller {}", ad.seller_id)))?;

        let prediction = self
            .model
            .predict(&AdAttributes::from_subject(&ad, &seller))?;

        let outcome = TaskOutcome::completed(prediction.is_violation, prediction.probability)?;
        self.results.update(message.task_id, &outcome).await?;

        Ok(prediction)
    }

    async fn record_failure(&self, task_id: TaskId, error: &str) {
        if let Err(err) = self
            .results
            .update(task_id, &TaskOutcome::failed(error))
            .await
        {
            // The DLQ entry is the only remaining record of this failure.
            error!(task_id = %task_id, error = %err, "could not record failed status");
        }
    }

    async fn handle_unparseable(&self, payload: &[u8], err: &QueueError) {
        if self.settings.dlq_unparseable {
            warn!(error = %err, "unparseable message, dead-lettering");
            self.dead_letter(DlqMessage::unparseable(payload, err.to_string()))
                .await;
        } else {
            warn!(
                error = %err,
                raw = %String::from_utf8_lossy(payload),
                "unparseable message, dropping"
            );
        }
    }

    /// Publish to the DLQ through a lease scoped to this call.
    async fn dead_letter(&self, message: DlqMessage) {
        let publisher = match self.queue.publisher().await {
            Ok(publisher) => publisher,
            Err(err) => {
                error!(error = %err, "could not acquire publisher for dead-letter");
                return;
            }
        };

        match publisher
            .publish_dead_letter(&self.settings.dlq_topic, &message)
            .await
        {
            Ok(()) => warn!(
                dlq_topic = %self.settings.dlq_topic,
                retry_count = message.retry_count,
                "message dead-lettered"
            ),
            Err(err) => {
                error!(error = %err, dlq_topic = %self.settings.dlq_topic, "dead-letter publish failed")
            }
        }
    }
}
