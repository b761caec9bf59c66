use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use admod_core::{ModerationTask, SubjectId, TaskId, TaskOutcome, TaskStatus};

use super::{ResultStore, StoreError};

/// Postgres-backed store over the `moderation_results` table.
#[derive(Debug, Clone)]
pub struct PostgresResultStore {
    pool: Arc<PgPool>,
}

impl PostgresResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: i64,
    item_id: i64,
    status: String,
    is_violation: Option<bool>,
    probability: Option<f64>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for ModerationTask {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status =
            TaskStatus::parse(&row.status).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let task = ModerationTask {
            task_id: TaskId::new(row.id),
            subject_id: SubjectId::new(row.item_id),
            status,
            is_violation: row.is_violation,
            probability: row.probability,
            error_message: row.error_message,
            created_at: row.created_at,
            processed_at: row.processed_at,
        };
        task.check_invariants()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(task)
    }
}

const TASK_COLUMNS: &str =
    "id, item_id, status, is_violation, probability, error_message, created_at, processed_at";

#[async_trait]
impl ResultStore for PostgresResultStore {
    #[instrument(skip(self), fields(subject_id = %subject_id), err)]
    async fn create_pending(&self, subject_id: SubjectId) -> Result<ModerationTask, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "INSERT INTO moderation_results (item_id, status) VALUES ($1, 'pending') RETURNING {TASK_COLUMNS}"
        ))
        .bind(subject_id.get())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_pending", e))?;

        row.try_into()
    }

    /// `processed_at` only moves when the terminal values actually change, so
    /// a redelivered message leaves the row byte-for-byte unchanged.
    #[instrument(skip(self, outcome), fields(task_id = %task_id, status = %outcome.status()), err)]
    async fn update(&self, task_id: TaskId, outcome: &TaskOutcome) -> Result<(), StoreError> {
        let (is_violation, probability, error_message) = outcome.columns();

        sqlx::query(
            r#"
            UPDATE moderation_results
            SET status = $2,
                is_violation = $3,
                probability = $4,
                error_message = $5,
                processed_at = CASE
                    WHEN status = $2
                     AND is_violation IS NOT DISTINCT FROM $3
                     AND probability IS NOT DISTINCT FROM $4
                     AND error_message IS NOT DISTINCT FROM $5
                    THEN processed_at
                    ELSE NOW()
                END
            WHERE id = $1
            "#,
        )
        .bind(task_id.get())
        .bind(outcome.status().as_str())
        .bind(is_violation)
        .bind(probability)
        .bind(error_message)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn get(&self, task_id: TaskId) -> Result<Option<ModerationTask>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM moderation_results WHERE id = $1"
        ))
        .bind(task_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(ModerationTask::try_from).transpose()
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn delete(&self, task_id: TaskId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM moderation_results WHERE id = $1")
            .bind(task_id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(subject_id = %subject_id), err)]
    async fn delete_by_subject(&self, subject_id: SubjectId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM moderation_results WHERE item_id = $1")
            .bind(subject_id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_by_subject", e))?;
        Ok(result.rows_affected())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Query(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection(format!("{operation}: {err}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("{operation}: {err}"))
        }
        other => StoreError::Query(format!("{operation}: {other}")),
    }
}
