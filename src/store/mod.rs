//! External collaborators consumed by the coordinator.
//!
//! # Data Flow
//! ```text
//! constraints/  → RecordStore (write errors carry constraint detail)
//! migration/    → RecordStore (row counts) → BackupSink (table snapshots)
//!               → RestoreRequester (rollback hand-off)
//! webhooks/     → DeadLetterSink (exhausted events)
//! leaks/        → Notifier (aggregate memory alerts, fire-and-forget)
//! ```
//!
//! # Design Decisions
//! - Every collaborator is a trait object so deployments swap backends freely
//! - `memory.rs` and `fs.rs` are complete implementations, not mocks
//! - Errors are cloneable so audit records and callers can both keep them

pub mod fs;
pub mod memory;
pub mod notify;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constraints::ViolationKind;
use crate::webhooks::DeadLetterEntry;

pub use fs::{JsonFileBackup, JsonlDeadLetterSink};
pub use memory::{ErrorStyle, MemoryDeadLetterSink, MemoryStore, TableSchema};
pub use notify::{HttpNotifier, LogNotifier};

/// Errors reported by datastore, backup and sink collaborators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Structured constraint rejection reported by the driver.
    #[error("{message}")]
    Constraint {
        kind: ViolationKind,
        table: String,
        constraint: String,
        field: Option<String>,
        value: Option<String>,
        message: String,
    },

    /// Raw driver error text.
    #[error("{0}")]
    Database(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Durable relational store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a row (a JSON object) into `table`.
    async fn insert(&self, table: &str, row: serde_json::Value) -> Result<(), StoreError>;

    /// Number of rows currently in `table`.
    async fn count(&self, table: &str) -> Result<u64, StoreError>;

    /// Full contents of `table`.
    async fn export(&self, table: &str) -> Result<Vec<serde_json::Value>, StoreError>;
}

/// Table snapshot mechanism.
#[async_trait]
pub trait BackupSink: Send + Sync {
    /// Copy the full contents of `table` under `location`, returning bytes written.
    async fn snapshot_table(&self, table: &str, location: &str) -> Result<u64, StoreError>;
}

/// Durable store for events that exhausted their retries.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn persist(&self, entry: &DeadLetterEntry) -> Result<(), StoreError>;
}

/// Receives the rollback decision for a failed migration and starts the restore.
#[async_trait]
pub trait RestoreRequester: Send + Sync {
    async fn request_restore(
        &self,
        migration: &crate::migration::MigrationRecord,
    ) -> Result<(), StoreError>;
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "info"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Outbound operational alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub component: String,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, component: &str, title: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            component: component.to_string(),
            title: title.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound push/notify mechanism.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}
