use axum::{
    Router,
    routing::{get, post},
};

pub mod moderation;
pub mod predict;
pub mod system;

/// Router for every pipeline endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/predict", post(predict::predict))
        .route("/simple_predict", post(predict::simple_predict))
        .route("/async_predict", post(moderation::async_predict))
        .route("/moderation_result/:task_id", get(moderation::moderation_result))
        .route("/close", post(moderation::close))
}
