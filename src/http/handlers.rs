//! Webhook ingestion and the admin read API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constraints::ConstraintViolation;
use crate::http::server::AppState;
use crate::leaks::{ConnectionSummary, MemoryLeakReport};
use crate::migration::MigrationRecord;
use crate::registry::ResilienceStatus;
use crate::webhooks::{WebhookError, WebhookFailureRecord, WebhookOutcome, WebhookStatus};

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct IngestParams {
    pub max_attempts: Option<u32>,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// `POST /webhooks/{event_type}`.
///
/// 200 when handled on the first attempt; 202 once the coordinator owns the event
/// (queued for retry or dead-lettered).
pub async fn ingest_webhook(
    State(state): State<AppState>,
    Path(event_type): Path<String>,
    Query(params): Query<IngestParams>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<WebhookOutcome>), WebhookError> {
    let endpoint_url = format!(
        "{}/webhooks/{}",
        state.config.server.public_base_url.trim_end_matches('/'),
        event_type
    );

    let outcome = state
        .coordinator
        .webhooks()
        .process_with_retry(&event_type, payload, &endpoint_url, params.max_attempts)
        .await?;

    let status = match outcome.status {
        WebhookStatus::Resolved => StatusCode::OK,
        _ => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub resilience: ResilienceStatus,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        resilience: state.coordinator.status(),
    })
}

pub async fn get_violations(State(state): State<AppState>) -> Json<Vec<ConstraintViolation>> {
    Json(state.coordinator.constraints().open_violations())
}

#[derive(Serialize)]
pub struct LeakOverview {
    pub active_connections: Vec<ConnectionSummary>,
    pub reports: Vec<MemoryLeakReport>,
}

pub async fn get_leaks(State(state): State<AppState>) -> Json<LeakOverview> {
    let leaks = state.coordinator.leaks();
    Json(LeakOverview {
        active_connections: leaks.active_connections(),
        reports: leaks.reports(),
    })
}

pub async fn get_migrations(State(state): State<AppState>) -> Json<Vec<MigrationRecord>> {
    Json(
        state
            .coordinator
            .migrations()
            .map(|m| m.migrations())
            .unwrap_or_default(),
    )
}

pub async fn get_webhooks(State(state): State<AppState>) -> Json<Vec<WebhookFailureRecord>> {
    Json(state.coordinator.webhooks().failures())
}
