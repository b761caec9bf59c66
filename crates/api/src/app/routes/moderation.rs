use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Extension, Path,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};

use admod_core::TaskId;
use admod_infra::PipelineError;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub async fn async_predict(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::SubjectRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let subject_id = match body.subject_id() {
        Ok(id) => id,
        Err(e) => return errors::pipeline_error_to_response(PipelineError::from(e)),
    };

    match services.moderation.producer.submit(subject_id).await {
        Ok(submitted) => (
            StatusCode::ACCEPTED,
            Json(dto::AsyncPredictResponse {
                task_id: submitted.task_id.get(),
                status: submitted.status,
                message: "Moderation request accepted".to_string(),
            }),
        )
            .into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn moderation_result(
    Extension(services): Extension<Arc<AppServices>>,
    task_id: Result<Path<i64>, PathRejection>,
) -> axum::response::Response {
    let Path(task_id) = match task_id {
        Ok(p) => p,
        Err(rejection) => return errors::path_rejection(rejection),
    };
    let task_id = match TaskId::parse_positive(task_id) {
        Ok(id) => id,
        Err(e) => return errors::pipeline_error_to_response(PipelineError::from(e)),
    };

    match services.moderation.status.get_result(task_id).await {
        Ok(task) => Json(dto::ModerationResultResponse::from(task)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn close(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::SubjectRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let subject_id = match body.subject_id() {
        Ok(id) => id,
        Err(e) => return errors::pipeline_error_to_response(PipelineError::from(e)),
    };

    match services.moderation.closer.close(subject_id).await {
        Ok(()) => Json(dto::CloseResponse {
            item_id: subject_id.get(),
            closed: true,
        })
        .into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}
