//! Migration safety.
//!
//! # Data Flow
//! ```text
//! execute_safe_migration(name, critical_tables, migration)
//!     → record (pending)
//!     → per table: RecordStore::count + BackupSink::snapshot_table
//!         → any failure → failed, migration never runs
//!     → RollbackPlan (fixed steps, estimate from record counts)
//!     → running → migration()
//!         → Err → failed → RestoreRequester → rolled_back
//!     → recount every table
//!         → mismatch → failed → RestoreRequester → rolled_back
//!     → completed
//! ```
//!
//! # Design Decisions
//! - No mutation without a complete backup
//! - A changed row count is a failure even when the migration returned Ok
//! - This component decides and records a rollback; the restore itself is delegated
//! - Status moves only along `MigrationStatus::can_advance_to`

pub mod coordinator;
pub mod types;

pub use coordinator::MigrationSafetyCoordinator;
pub use types::{
    BoxError, MigrationError, MigrationRecord, MigrationStatus, RiskLevel, RollbackPlan,
    RollbackStep, Snapshot, TableMismatch,
};
