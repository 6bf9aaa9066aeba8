//! Migration records, rollback plans and errors.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Lifecycle: `pending → running → {completed | failed → rolled_back}`.
///
/// A backup failure moves `pending → failed` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Running => "running",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::RolledBack => "rolled_back",
        }
    }

    pub fn can_advance_to(&self, next: MigrationStatus) -> bool {
        use MigrationStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Failed) | (Running, Completed) | (Running, Failed) | (Failed, RolledBack)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationStatus::Completed | MigrationStatus::RolledBack)
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-migration backup of the critical tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tables: Vec<String>,
    pub record_counts: BTreeMap<String, u64>,
    pub backup_location: String,
    pub backup_size_bytes: u64,
}

impl Snapshot {
    pub fn total_records(&self) -> u64 {
        self.record_counts.values().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStep {
    StopTraffic,
    RestoreFromBackup,
    VerifyIntegrity,
    ResumeTraffic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Minimal,
    Moderate,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub steps: Vec<RollbackStep>,
    pub estimated_minutes: u64,
    pub risk: RiskLevel,
}

impl RollbackPlan {
    /// Plan for a migration backed by a complete snapshot.
    pub fn for_snapshot(snapshot: &Snapshot, records_per_minute: u64) -> Self {
        let rate = records_per_minute.max(1);
        Self {
            steps: vec![
                RollbackStep::StopTraffic,
                RollbackStep::RestoreFromBackup,
                RollbackStep::VerifyIntegrity,
                RollbackStep::ResumeTraffic,
            ],
            estimated_minutes: snapshot.total_records().div_ceil(rate).max(1),
            risk: RiskLevel::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: Uuid,
    pub name: String,
    pub snapshot: Snapshot,
    /// Absent when the backup never completed.
    pub rollback_plan: Option<RollbackPlan>,
    pub status: MigrationStatus,
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            snapshot: Snapshot::default(),
            rollback_plan: None,
            status: MigrationStatus::Pending,
            failure_reason: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Row count that changed across a migration. `actual` is `None` when the recount failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMismatch {
    pub table: String,
    pub expected: u64,
    pub actual: Option<u64>,
}

impl fmt::Display for TableMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual {
            Some(actual) => write!(f, "{}: expected {} rows, found {}", self.table, self.expected, actual),
            None => write!(f, "{}: expected {} rows, recount failed", self.table, self.expected),
        }
    }
}

/// Every variant except `InvalidName` carries the final record, so callers always see
/// whether the rollback decision was recorded.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration name must not be empty")]
    InvalidName,

    #[error("backup of table {table} failed, migration not started: {source}")]
    BackupFailed {
        record: Box<MigrationRecord>,
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("migration failed and was rolled back: {source}")]
    MigrationFailed {
        record: Box<MigrationRecord>,
        #[source]
        source: BoxError,
    },

    #[error("integrity check failed and migration was rolled back: {}", describe(.mismatches))]
    IntegrityCheckFailed {
        record: Box<MigrationRecord>,
        mismatches: Vec<TableMismatch>,
    },

    #[error("rollback failed after {cause}: {source}")]
    RollbackFailed {
        record: Box<MigrationRecord>,
        /// What made the rollback necessary.
        cause: String,
        #[source]
        source: StoreError,
    },
}

fn describe(mismatches: &[TableMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl MigrationError {
    pub fn record(&self) -> Option<&MigrationRecord> {
        match self {
            MigrationError::InvalidName => None,
            MigrationError::BackupFailed { record, .. }
            | MigrationError::MigrationFailed { record, .. }
            | MigrationError::IntegrityCheckFailed { record, .. }
            | MigrationError::RollbackFailed { record, .. } => Some(record),
        }
    }
}
