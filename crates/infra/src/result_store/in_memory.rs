use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use admod_core::{ModerationTask, SubjectId, TaskId, TaskOutcome};

use super::{ResultStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    tasks: RwLock<HashMap<TaskId, ModerationTask>>,
    next_id: AtomicI64,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StoreError {
        StoreError::Connection("result store lock poisoned".into())
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn create_pending(&self, subject_id: SubjectId) -> Result<ModerationTask, StoreError> {
        let id = TaskId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let task = ModerationTask::pending(id, subject_id, Utc::now());
        self.tasks
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(id, task.clone());
        Ok(task)
    }

    async fn update(&self, task_id: TaskId, outcome: &TaskOutcome) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| Self::poisoned())?;
        if let Some(task) = tasks.get_mut(&task_id) {
            task.apply_outcome(outcome, Utc::now());
        }
        Ok(())
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<ModerationTask>, StoreError> {
        Ok(self
            .tasks
            .read()
            .map_err(|_| Self::poisoned())?
            .get(&task_id)
            .cloned())
    }

    async fn delete(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.tasks
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(&task_id);
        Ok(())
    }

    async fn delete_by_subject(&self, subject_id: SubjectId) -> Result<u64, StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| Self::poisoned())?;
        let before = tasks.len();
        tasks.retain(|_, t| t.subject_id != subject_id);
        Ok((before - tasks.len()) as u64)
    }
}
