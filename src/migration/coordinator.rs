//! Snapshot, migrate, verify, roll back.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::MigrationConfig;
use crate::migration::types::{
    BoxError, MigrationError, MigrationRecord, MigrationStatus, RollbackPlan, Snapshot,
    TableMismatch,
};
use crate::observability::metrics;
use crate::registry::ResilienceRegistry;
use crate::store::{BackupSink, RecordStore, RestoreRequester, StoreError};

pub struct MigrationSafetyCoordinator {
    registry: Arc<ResilienceRegistry>,
    store: Arc<dyn RecordStore>,
    backup: Arc<dyn BackupSink>,
    restorer: Option<Arc<dyn RestoreRequester>>,
    config: MigrationConfig,
}

impl MigrationSafetyCoordinator {
    pub fn new(
        registry: Arc<ResilienceRegistry>,
        store: Arc<dyn RecordStore>,
        backup: Arc<dyn BackupSink>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            registry,
            store,
            backup,
            restorer: None,
            config,
        }
    }

    /// Hand rollback decisions to a restore mechanism.
    pub fn with_restorer(mut self, restorer: Arc<dyn RestoreRequester>) -> Self {
        self.restorer = Some(restorer);
        self
    }

    /// Back up `critical_tables`, run `migration`, then verify row counts.
    ///
    /// `migration` never runs unless every table was backed up. A failing migration or a
    /// changed row count marks the record `failed`, then `rolled_back` once the rollback
    /// decision is recorded, and the error is returned.
    pub async fn execute_safe_migration<F, Fut, E>(
        &self,
        name: &str,
        critical_tables: &[&str],
        migration: F,
    ) -> Result<MigrationRecord, MigrationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<BoxError>,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(MigrationError::InvalidName);
        }

        let record = MigrationRecord::new(name);
        let id = record.id;
        self.registry.migrations.put(id, record);
        let started = Instant::now();

        tracing::info!(migration_id = %id, name = %name, tables = ?critical_tables, "Migration snapshot starting");
        let snapshot = match self.snapshot(id, name, critical_tables).await {
            Ok(snapshot) => snapshot,
            Err((table, source)) => {
                let record = self.advance(id, MigrationStatus::Failed, |r| {
                    r.failure_reason = Some(format!("backup of {table} failed: {source}"));
                    r.completed_at = Some(Utc::now());
                });
                tracing::error!(
                    migration_id = %id,
                    table = %table,
                    error = %source,
                    "Backup failed, migration aborted before running"
                );
                metrics::record_migration(record.status.as_str(), started.elapsed());
                return Err(MigrationError::BackupFailed {
                    record: Box::new(record),
                    table,
                    source,
                });
            }
        };

        let plan = RollbackPlan::for_snapshot(&snapshot, self.config.records_per_minute);
        tracing::info!(
            migration_id = %id,
            backup_location = %snapshot.backup_location,
            backup_size_bytes = snapshot.backup_size_bytes,
            records = snapshot.total_records(),
            estimated_rollback_minutes = plan.estimated_minutes,
            "Snapshot complete"
        );
        self.advance(id, MigrationStatus::Running, |r| {
            r.snapshot = snapshot.clone();
            r.rollback_plan = Some(plan);
        });

        if let Err(e) = migration().await {
            let source: BoxError = e.into();
            let cause = format!("migration function failed: {source}");
            return Err(match self.roll_back(id, &cause, started).await {
                Ok(record) => MigrationError::MigrationFailed {
                    record: Box::new(record),
                    source,
                },
                Err(err) => err,
            });
        }

        let mismatches = self.verify(&snapshot).await;
        if !mismatches.is_empty() {
            let cause = format!("integrity check failed on {} table(s)", mismatches.len());
            for m in &mismatches {
                tracing::error!(migration_id = %id, mismatch = %m, "Row count changed across migration");
            }
            return Err(match self.roll_back(id, &cause, started).await {
                Ok(record) => MigrationError::IntegrityCheckFailed {
                    record: Box::new(record),
                    mismatches,
                },
                Err(err) => err,
            });
        }

        let record = self.advance(id, MigrationStatus::Completed, |r| {
            r.completed_at = Some(Utc::now());
        });
        metrics::record_migration(record.status.as_str(), started.elapsed());
        tracing::info!(migration_id = %id, name = %name, "Migration completed");
        Ok(record)
    }

    async fn snapshot(
        &self,
        id: Uuid,
        name: &str,
        tables: &[&str],
    ) -> Result<Snapshot, (String, StoreError)> {
        let location = self.backup_location(id, name);
        let mut snapshot = Snapshot {
            tables: tables.iter().map(|t| t.to_string()).collect(),
            backup_location: location.display().to_string(),
            ..Snapshot::default()
        };

        for table in tables {
            let count = self
                .store
                .count(table)
                .await
                .map_err(|e| (table.to_string(), e))?;
            let bytes = self
                .backup
                .snapshot_table(table, &snapshot.backup_location)
                .await
                .map_err(|e| (table.to_string(), e))?;

            tracing::debug!(migration_id = %id, table = %table, rows = count, bytes, "Table backed up");
            snapshot.record_counts.insert(table.to_string(), count);
            snapshot.backup_size_bytes += bytes;
        }
        Ok(snapshot)
    }

    fn backup_location(&self, id: Uuid, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.config.backup_dir.join(format!("{safe}-{id}"))
    }

    async fn verify(&self, snapshot: &Snapshot) -> Vec<TableMismatch> {
        let mut mismatches = Vec::new();
        for (table, expected) in &snapshot.record_counts {
            let actual = match self.store.count(table).await {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::error!(table = %table, error = %e, "Recount failed during verification");
                    None
                }
            };
            if actual != Some(*expected) {
                mismatches.push(TableMismatch {
                    table: table.clone(),
                    expected: *expected,
                    actual,
                });
            }
        }
        mismatches
    }

    /// Record the rollback decision. On a restore hand-off failure the record stays `failed`.
    async fn roll_back(
        &self,
        id: Uuid,
        cause: &str,
        started: Instant,
    ) -> Result<MigrationRecord, MigrationError> {
        let failed = self.advance(id, MigrationStatus::Failed, |r| {
            r.failure_reason = Some(cause.to_string());
        });
        tracing::error!(migration_id = %id, cause = %cause, "Migration failed, rolling back");

        if let Some(restorer) = &self.restorer {
            if let Err(e) = restorer.request_restore(&failed).await {
                let record = self.advance(id, MigrationStatus::Failed, |r| {
                    r.completed_at = Some(Utc::now());
                });
                tracing::error!(migration_id = %id, error = %e, "Rollback failed");
                metrics::record_migration("rollback_failed", started.elapsed());
                return Err(MigrationError::RollbackFailed {
                    record: Box::new(record),
                    cause: cause.to_string(),
                    source: e,
                });
            }
        }

        let record = self.advance(id, MigrationStatus::RolledBack, |r| {
            r.completed_at = Some(Utc::now());
        });
        tracing::error!(
            migration_id = %id,
            backup_location = %record.snapshot.backup_location,
            "Migration rolled back"
        );
        metrics::record_migration(record.status.as_str(), started.elapsed());
        Ok(record)
    }

    /// Apply `edit` and move to `next` when the lifecycle allows it.
    fn advance(
        &self,
        id: Uuid,
        next: MigrationStatus,
        edit: impl FnOnce(&mut MigrationRecord),
    ) -> MigrationRecord {
        self.registry
            .migrations
            .update(&id, |r| {
                if r.status != next {
                    if r.status.can_advance_to(next) {
                        r.status = next;
                    } else {
                        tracing::warn!(
                            migration_id = %id,
                            from = %r.status,
                            to = %next,
                            "Ignoring invalid migration status transition"
                        );
                    }
                }
                edit(r);
                r.clone()
            })
            .unwrap_or_else(|| {
                // records are never deleted, so this only happens if the registry was swapped
                let mut record = MigrationRecord::new("unknown");
                record.id = id;
                record.status = next;
                record
            })
    }

    pub fn get_migration(&self, id: Uuid) -> Option<MigrationRecord> {
        self.registry.migrations.get(&id)
    }

    /// Every migration, oldest first.
    pub fn migrations(&self) -> Vec<MigrationRecord> {
        let mut all = self.registry.migrations.values();
        all.sort_by_key(|m| m.started_at);
        all
    }
}
