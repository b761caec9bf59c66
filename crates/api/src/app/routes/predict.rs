use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    response::IntoResponse,
};

use admod_infra::PipelineError;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Score a full ad payload.
pub async fn predict(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::AdRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };

    match services.moderation.predictions.predict(&body.attributes()) {
        Ok(prediction) => Json(dto::PredictResponse::from(prediction)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// Score a stored ad, cache first.
pub async fn simple_predict(
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

    match services
        .moderation
        .predictions
        .simple_predict(subject_id)
        .await
    {
        Ok(prediction) => Json(dto::PredictResponse::from(prediction)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}
