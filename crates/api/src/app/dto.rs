use serde::{Deserialize, Serialize};

use admod_core::{DomainError, ModerationTask, SubjectId, TaskStatus};
use admod_scoring::{AdAttributes, Prediction};

// -------------------------
// Request DTOs
// -------------------------

/// Full ad payload scored without any lookup.
#[derive(Debug, Deserialize)]
pub struct AdRequest {
    pub seller_id: i64,
    pub is_verified_seller: bool,
    pub item_id: i64,
    pub name: String,
    pub description: String,
    pub category: i32,
    pub images_qty: i32,
}

impl AdRequest {
    pub fn attributes(&self) -> AdAttributes {
        AdAttributes {
            is_verified_seller: self.is_verified_seller,
            images_qty: self.images_qty,
            description: self.description.clone(),
            category: self.category,
        }
    }
}

/// Body of every subject-addressed endpoint.
#[derive(Debug, Deserialize)]
pub struct SubjectRequest {
    #[serde(alias = "subject_id")]
    pub item_id: i64,
}

impl SubjectRequest {
    pub fn subject_id(&self) -> Result<SubjectId, DomainError> {
        SubjectId::parse_positive(self.item_id)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub is_violation: bool,
    pub probability: f64,
}

impl From<Prediction> for PredictResponse {
    fn from(p: Prediction) -> Self {
        Self {
            is_violation: p.is_violation,
            probability: p.probability,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AsyncPredictResponse {
    pub task_id: i64,
    pub status: TaskStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ModerationResultResponse {
    pub task_id: i64,
    pub status: TaskStatus,
    pub is_violation: Option<bool>,
    pub probability: Option<f64>,
    pub error_message: Option<String>,
}

impl From<ModerationTask> for ModerationResultResponse {
    fn from(task: ModerationTask) -> Self {
        Self {
            task_id: task.task_id.get(),
            status: task.status,
            is_violation: task.is_violation,
            probability: task.probability,
            error_message: task.error_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CloseResponse {
    pub item_id: i64,
    pub closed: bool,
}
