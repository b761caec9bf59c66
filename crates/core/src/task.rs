//! Moderation task model.
//!
//! A task is created `pending` at submission time and moved exactly once to a
//! terminal state (`completed` or `failed`). Redelivery may re-apply the same
//! terminal write; [`ModerationTask::apply_outcome`] makes that a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{SubjectId, TaskId};

/// Lifecycle status of a moderation task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(DomainError::validation(format!("unknown task status: {other}"))),
        }
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of processing a task.
///
/// The two variants carry exactly the fields each terminal status allows, so a
/// completed task can never carry an error message and vice versa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { is_violation: bool, probability: f64 },
    Failed { error_message: String },
}

impl TaskOutcome {
    /// Build a completed outcome; `probability` must lie in `[0, 1]`.
    pub fn completed(is_violation: bool, probability: f64) -> DomainResult<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(DomainError::invariant(format!(
                "probability must be within [0, 1], got {probability}"
            )));
        }
        Ok(TaskOutcome::Completed {
            is_violation,
            probability,
        })
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            error_message: error_message.into(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed { .. } => TaskStatus::Completed,
            TaskOutcome::Failed { .. } => TaskStatus::Failed,
        }
    }

    /// Column view: `(is_violation, probability, error_message)`.
    pub fn columns(&self) -> (Option<bool>, Option<f64>, Option<&str>) {
        match self {
            TaskOutcome::Completed {
                is_violation,
                probability,
            } => (Some(*is_violation), Some(*probability), None),
            TaskOutcome::Failed { error_message } => (None, None, Some(error_message.as_str())),
        }
    }
}

/// One asynchronous scoring request, tracked to a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationTask {
    pub task_id: TaskId,
    pub subject_id: SubjectId,
    pub status: TaskStatus,
    pub is_violation: Option<bool>,
    pub probability: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ModerationTask {
    pub fn pending(task_id: TaskId, subject_id: SubjectId, created_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            subject_id,
            status: TaskStatus::Pending,
            is_violation: None,
            probability: None,
            error_message: None,
            created_at,
            processed_at: None,
        }
    }

    /// The terminal outcome recorded on this task, if any.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        match self.status {
            TaskStatus::Pending => None,
            TaskStatus::Completed => Some(TaskOutcome::Completed {
                is_violation: self.is_violation.unwrap_or_default(),
                probability: self.probability.unwrap_or_default(),
            }),
            TaskStatus::Failed => Some(TaskOutcome::Failed {
                error_message: self.error_message.clone().unwrap_or_default(),
            }),
        }
    }

    /// Apply a terminal outcome.
    ///
    /// Re-applying the outcome already stored leaves the task untouched
    /// (including `processed_at`) and returns `false`. A different outcome
    /// overwrites the terminal fields (last write wins).
    pub fn apply_outcome(&mut self, outcome: &TaskOutcome, now: DateTime<Utc>) -> bool {
        if self.outcome().as_ref() == Some(outcome) {
            return false;
        }

        let (is_violation, probability, error_message) = outcome.columns();
        self.status = outcome.status();
        self.is_violation = is_violation;
        self.probability = probability;
        self.error_message = error_message.map(str::to_string);
        self.processed_at = Some(now);
        true
    }

    /// Check the status/field invariants of the data model.
    pub fn check_invariants(&self) -> DomainResult<()> {
        let ok = match self.status {
            TaskStatus::Pending => {
                self.is_violation.is_none()
                    && self.probability.is_none()
                    && self.error_message.is_none()
                    && self.processed_at.is_none()
            }
            TaskStatus::Completed => {
                self.is_violation.is_some()
                    && self.probability.is_some_and(|p| (0.0..=1.0).contains(&p))
                    && self.error_message.is_none()
                    && self.processed_at.is_some()
            }
            TaskStatus::Failed => {
                self.error_message.is_some()
                    && self.is_violation.is_none()
                    && self.probability.is_none()
                    && self.processed_at.is_some()
            }
        };

        if ok {
            Ok(())
        } else {
            Err(DomainError::invariant(format!(
                "task {} has fields inconsistent with status {}",
                self.task_id, self.status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pending() -> ModerationTask {
        ModerationTask::pending(TaskId::new(1), SubjectId::new(10), Utc::now())
    }

    #[test]
    fn pending_task_satisfies_invariants() {
        let task = pending();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.check_invariants().is_ok());
        assert!(task.outcome().is_none());
    }

    #[test]
    fn completed_outcome_sets_terminal_fields() {
        let mut task = pending();
        let outcome = TaskOutcome::completed(true, 0.91).unwrap();

        assert!(task.apply_outcome(&outcome, Utc::now()));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.is_violation, Some(true));
        assert_eq!(task.probability, Some(0.91));
        assert!(task.error_message.is_none());
        assert!(task.processed_at.is_some());
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn failed_outcome_clears_prediction_fields() {
        let mut task = pending();
        task.apply_outcome(&TaskOutcome::completed(false, 0.2).unwrap(), Utc::now());
        task.apply_outcome(&TaskOutcome::failed("seller 3 not found"), Utc::now());

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.is_violation.is_none());
        assert!(task.probability.is_none());
        assert_eq!(task.error_message.as_deref(), Some("seller 3 not found"));
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn completed_rejects_out_of_range_probability() {
        assert!(TaskOutcome::completed(true, 1.5).is_err());
        assert!(TaskOutcome::completed(true, f64::NAN).is_err());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [TaskStatus::Pending, TaskStatus::Completed, TaskStatus::Failed] {
            assert_eq!(TaskStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(TaskStatus::parse("running").is_err());
    }

    proptest! {
        /// Re-applying an identical terminal outcome leaves the task unchanged.
        #[test]
        fn reapplying_outcome_is_idempotent(
            probability in 0.0f64..=1.0,
            is_violation in any::<bool>(),
        ) {
            let mut task = pending();
            let outcome = TaskOutcome::completed(is_violation, probability).unwrap();

            task.apply_outcome(&outcome, Utc::now());
            let once = task.clone();

            let changed = task.apply_outcome(&outcome, Utc::now() + chrono::Duration::seconds(5));

            prop_assert!(!changed);
            prop_assert_eq!(task, once);
        }
    }
}
