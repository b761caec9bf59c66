use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use admod_api::app::AppServices;
use admod_core::{NewAd, SubjectId};
use admod_infra::PipelineConfig;
use admod_infra::directory::SubjectDirectory;

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory backends, ephemeral port.
        let config = PipelineConfig {
            poll_interval: Duration::from_millis(10),
            ..PipelineConfig::default()
        };
        let (app, services) = admod_api::app::build_app(&config)
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn seed_ad(&self, verified: bool, images_qty: i32) -> SubjectId {
        let directory = &self.services.moderation.directory;
        let seller = directory.create_seller(verified).await.unwrap();
        directory
            .create_ad(NewAd {
                seller_id: seller.id,
                title: "sofa".to_string(),
                description: "three-seat sofa, good condition".to_string(),
                category: 7,
                images_qty,
            })
            .await
            .unwrap()
            .id
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn result_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    task_id: i64,
) -> serde_json::Value {
    // The worker completes tasks asynchronously; poll until terminal.
    for _ in 0..200 {
        let res = client
            .get(srv.url(&format!("/moderation_result/{task_id}")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        if body["status"] != "pending" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("task {task_id} stayed pending");
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["stores"], "in_memory");
}

#[tokio::test]
async fn predict_scores_full_payload() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/predict"))
        .json(&json!({
            "seller_id": 1,
            "is_verified_seller": false,
            "item_id": 10,
            "name": "Phone",
            "description": "cheap",
            "category": 2,
            "images_qty": 0,
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["is_violation"], true);
    let p = body["probability"].as_f64().unwrap();
    assert!(p > 0.5 && p <= 1.0);
}

#[tokio::test]
async fn predict_rejects_invalid_payloads() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let negative_images = client
        .post(srv.url("/predict"))
        .json(&json!({
            "seller_id": 1,
            "is_verified_seller": true,
            "item_id": 10,
            "name": "Phone",
            "description": "ok",
            "category": 2,
            "images_qty": -1,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(negative_images.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = negative_images.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let missing_field = client
        .post(srv.url("/predict"))
        .json(&json!({ "seller_id": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_field.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn simple_predict_validates_and_caches() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/simple_predict"))
        .json(&json!({ "item_id": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = client
        .post(srv.url("/simple_predict"))
        .json(&json!({ "item_id": 9999 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let id = srv.seed_ad(true, 4).await;
    let first: serde_json::Value = client
        .post(srv.url("/simple_predict"))
        .json(&json!({ "item_id": id.get() }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // `subject_id` is accepted as an alias.
    let second: serde_json::Value = client
        .post(srv.url("/simple_predict"))
        .json(&json!({ "subject_id": id.get() }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first["is_violation"], false);
}

#[tokio::test]
async fn async_predict_lifecycle() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let id = srv.seed_ad(false, 0).await;

    let res = client
        .post(srv.url("/async_predict"))
        .json(&json!({ "item_id": id.get() }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: serde_json::Value = res.json().await.unwrap();
    assert_eq!(accepted["status"], "pending");
    assert!(accepted["message"].is_string());
    let task_id = accepted["task_id"].as_i64().unwrap();

    let result = result_eventually(&client, &srv, task_id).await;
    assert_eq!(result["task_id"], task_id);
    assert_eq!(result["status"], "completed");
    assert_eq!(result["is_violation"], true);
    assert!(result["probability"].as_f64().is_some());
    assert!(result["error_message"].is_null());
}

#[tokio::test]
async fn async_predict_for_unknown_ad_is_404() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/async_predict"))
        .json(&json!({ "item_id": 9999 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url("/moderation_result/424242"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url("/moderation_result/not-a-number"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn close_invalidates_results_and_predictions() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let id = srv.seed_ad(true, 2).await;

    let accepted: serde_json::Value = client
        .post(srv.url("/async_predict"))
        .json(&json!({ "item_id": id.get() }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task_id = accepted["task_id"].as_i64().unwrap();
    result_eventually(&client, &srv, task_id).await;

    let res = client
        .post(srv.url("/close"))
        .json(&json!({ "item_id": id.get() }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "item_id": id.get(), "closed": true }));

    let res = client
        .get(srv.url(&format!("/moderation_result/{task_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(srv.url("/simple_predict"))
        .json(&json!({ "item_id": id.get() }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Repeating a close re-runs the cleanup; an unknown ad is 404.
    let res = client
        .post(srv.url("/close"))
        .json(&json!({ "item_id": id.get() }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(srv.url("/close"))
        .json(&json!({ "item_id": 9999 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
