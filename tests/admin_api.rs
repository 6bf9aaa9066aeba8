//! HTTP surface: webhook ingestion and the bearer-protected admin API.

mod common;

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use resilience_coordinator::config::CoordinatorConfig;
use resilience_coordinator::webhooks::WebhookHandler;
use resilience_coordinator::HttpServer;
use serde_json::json;
use tower::ServiceExt;

const ADMIN_KEY: &str = "test-admin-key";

fn app(config: CoordinatorConfig, handler: Arc<dyn WebhookHandler>) -> Router {
    let (coordinator, _) = common::coordinator_with_handler(config.clone(), handler);
    HttpServer::new(Arc::new(coordinator), Arc::new(config)).router()
}

fn webhook(path: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "id": "evt_42" }).to_string()))
        .unwrap()
}

fn admin_get(path: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(key) = key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_carries_request_id() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(
        common::config_in(dir.path()),
        common::flaky_handler(0, Arc::new(AtomicU32::new(0))),
    );

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = common::body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_webhook_handled_first_time_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(
        common::config_in(dir.path()),
        common::flaky_handler(0, Arc::new(AtomicU32::new(0))),
    );

    let response = app.oneshot(webhook("/webhooks/payment.captured")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert_eq!(body["status"], "resolved");
    assert_eq!(body["attempts_made"], 1);
}

#[tokio::test]
async fn test_failed_webhook_is_accepted_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(
        common::config_in(dir.path()),
        common::flaky_handler(u32::MAX, Arc::new(AtomicU32::new(0))),
    );

    let response = app
        .clone()
        .oneshot(webhook("/webhooks/payment.failed"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = common::body_json(response).await;
    assert_eq!(body["status"], "retrying");
    assert!(body["next_retry"].is_string());

    let response = app
        .clone()
        .oneshot(admin_get("/admin/webhooks", Some(ADMIN_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let records = common::body_json(response).await;
    assert_eq!(records.as_array().unwrap().len(), 1);
    assert_eq!(records[0]["event_type"], "payment.failed");
    assert_eq!(
        records[0]["endpoint_url"],
        "http://localhost:8090/webhooks/payment.failed"
    );

    let response = app
        .oneshot(admin_get("/admin/status", Some(ADMIN_KEY)))
        .await
        .unwrap();
    let status = common::body_json(response).await;
    assert_eq!(status["status"], "operational");
    assert_eq!(status["resilience"]["retrying_webhooks"], 1);
}

#[tokio::test]
async fn test_invalid_max_attempts_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(
        common::config_in(dir.path()),
        common::flaky_handler(0, Arc::new(AtomicU32::new(0))),
    );

    let response = app
        .oneshot(webhook("/webhooks/payment.failed?max_attempts=0"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = common::body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("0"));
}

#[tokio::test]
async fn test_admin_requires_bearer_token() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(
        common::config_in(dir.path()),
        common::flaky_handler(0, Arc::new(AtomicU32::new(0))),
    );

    for key in [None, Some("wrong-key")] {
        let response = app
            .clone()
            .oneshot(admin_get("/admin/violations", key))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app
        .oneshot(admin_get("/admin/violations", Some(ADMIN_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::body_json(response).await, json!([]));
}

#[tokio::test]
async fn test_admin_leak_and_migration_views() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(
        common::config_in(dir.path()),
        common::flaky_handler(0, Arc::new(AtomicU32::new(0))),
    );

    let response = app
        .clone()
        .oneshot(admin_get("/admin/leaks", Some(ADMIN_KEY)))
        .await
        .unwrap();
    let leaks = common::body_json(response).await;
    assert_eq!(leaks["active_connections"], json!([]));
    assert_eq!(leaks["reports"], json!([]));

    let response = app
        .oneshot(admin_get("/admin/migrations", Some(ADMIN_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::body_json(response).await, json!([]));
}

#[tokio::test]
async fn test_admin_routes_absent_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::config_in(dir.path());
    config.admin.enabled = false;
    let app = app(config, common::flaky_handler(0, Arc::new(AtomicU32::new(0))));

    let response = app
        .oneshot(admin_get("/admin/status", Some(ADMIN_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
