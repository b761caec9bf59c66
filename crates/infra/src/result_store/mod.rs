//! Durable record of moderation tasks.
//!
//! Status moves `pending -> completed | failed` exactly once per outcome;
//! re-applying the stored outcome (queue redelivery) changes nothing,
//! including `processed_at`.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryResultStore;
pub use postgres::PostgresResultStore;

use async_trait::async_trait;
use thiserror::Error;

use admod_core::{ModerationTask, SubjectId, TaskId, TaskOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("result store connection error: {0}")]
    Connection(String),

    #[error("result store query error: {0}")]
    Query(String),

    /// A stored row violates the task invariants.
    #[error("corrupt task row: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert a new `pending` task and return it with its assigned id.
    async fn create_pending(&self, subject_id: SubjectId) -> Result<ModerationTask, StoreError>;

    /// Record a terminal outcome. Updating a task that does not exist is a
    /// silent no-op.
    async fn update(&self, task_id: TaskId, outcome: &TaskOutcome) -> Result<(), StoreError>;

    async fn get(&self, task_id: TaskId) -> Result<Option<ModerationTask>, StoreError>;

    /// Delete one task (used to undo a submission whose publish failed).
    async fn delete(&self, task_id: TaskId) -> Result<(), StoreError>;

    /// Delete every task for a subject; returns the number removed.
    async fn delete_by_subject(&self, subject_id: SubjectId) -> Result<u64, StoreError>;
}
