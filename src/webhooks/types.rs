//! Webhook failure records, dead letters and errors.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    /// Failed with no retry scheduled (coordinator shut down).
    Failed,
    Retrying,
    DeadLetter,
    Resolved,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Failed => "failed",
            WebhookStatus::Retrying => "retrying",
            WebhookStatus::DeadLetter => "dead_letter",
            WebhookStatus::Resolved => "resolved",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WebhookStatus::DeadLetter | WebhookStatus::Resolved)
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLog {
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookFailureRecord {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub endpoint_url: String,
    pub failure_reason: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status: WebhookStatus,
    pub first_failed_at: DateTime<Utc>,
    pub last_attempted_at: DateTime<Utc>,
    pub history: Vec<AttemptLog>,
}

/// What the dead-letter sink receives once retries are exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub webhook_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub endpoint_url: String,
    pub failure_reason: String,
    pub attempts: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_attempted_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
    pub history: Vec<AttemptLog>,
}

impl From<&WebhookFailureRecord> for DeadLetterEntry {
    fn from(r: &WebhookFailureRecord) -> Self {
        Self {
            webhook_id: r.id,
            event_type: r.event_type.clone(),
            payload: r.payload.clone(),
            endpoint_url: r.endpoint_url.clone(),
            failure_reason: r.failure_reason.clone(),
            attempts: r.attempts,
            first_failed_at: r.first_failed_at,
            last_attempted_at: r.last_attempted_at,
            dead_lettered_at: Utc::now(),
            history: r.history.clone(),
        }
    }
}

/// Result of `process_with_retry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookOutcome {
    pub id: Uuid,
    pub status: WebhookStatus,
    pub attempts_made: u32,
    pub next_retry: Option<DateTime<Utc>>,
}

/// What a handler receives on every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub event_type: String,
    pub payload: Value,
    pub endpoint_url: String,
    /// 1 for the synchronous attempt.
    pub delivery_attempt: u32,
}

/// Handler failure. The message ends up in the failure record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Input rejected before any dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(u32),

    #[error("event type must not be empty")]
    EmptyEventType,
}
