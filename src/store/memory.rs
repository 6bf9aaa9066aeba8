//! In-memory collaborators.
//!
//! `MemoryStore` enforces a small relational schema (unique, not-null, foreign-key and
//! check constraints) so constraint handling can be exercised without a database server.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::constraints::ViolationKind;
use crate::store::{DeadLetterSink, RecordStore, StoreError};
use crate::webhooks::DeadLetterEntry;

/// How constraint rejections are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorStyle {
    /// `StoreError::Constraint` with every detail filled in.
    #[default]
    Structured,
    /// Postgres-style message text in `StoreError::Database`.
    Text,
}

#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub field: String,
    pub references_table: String,
    pub references_field: String,
}

#[derive(Debug, Clone)]
pub struct CheckConstraint {
    pub name: String,
    pub field: String,
    pub predicate: fn(&Value) -> bool,
}

/// Table definition.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub name: String,
    pub unique: Vec<String>,
    pub not_null: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub checks: Vec<CheckConstraint>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn unique(mut self, field: &str) -> Self {
        self.unique.push(field.to_string());
        self
    }

    pub fn not_null(mut self, field: &str) -> Self {
        self.not_null.push(field.to_string());
        self
    }

    pub fn references(mut self, field: &str, table: &str, column: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            field: field.to_string(),
            references_table: table.to_string(),
            references_field: column.to_string(),
        });
        self
    }

    pub fn check(mut self, name: &str, field: &str, predicate: fn(&Value) -> bool) -> Self {
        self.checks.push(CheckConstraint {
            name: name.to_string(),
            field: field.to_string(),
            predicate,
        });
        self
    }
}

struct Table {
    schema: TableSchema,
    rows: Vec<Value>,
}

/// In-memory relational store.
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    style: ErrorStyle,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_style(ErrorStyle::Structured)
    }

    pub fn with_style(style: ErrorStyle) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            style,
        }
    }

    /// Create (or replace) a table.
    pub fn create_table(&self, schema: TableSchema) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.insert(
            schema.name.clone(),
            Table {
                schema,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    /// Remove every row matching `field == value`, returning how many were removed.
    pub fn delete_where(&self, table: &str, field: &str, value: &Value) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let before = t.rows.len();
        t.rows.retain(|row| row.get(field) != Some(value));
        Ok(before - t.rows.len())
    }

    fn insert_row(&self, table: &str, row: Value) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let t = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        if !row.is_object() {
            return Err(StoreError::Database(format!(
                "row for table \"{table}\" must be a JSON object"
            )));
        }

        for field in &t.schema.not_null {
            if row.get(field).map_or(true, Value::is_null) {
                return Err(self.violation(ViolationKind::NotNull, table, field, None, None));
            }
        }

        for check in &t.schema.checks {
            let value = row.get(&check.field).unwrap_or(&Value::Null);
            if !(check.predicate)(value) {
                return Err(self.violation(
                    ViolationKind::Check,
                    table,
                    &check.field,
                    Some(&check.name),
                    Some(value),
                ));
            }
        }

        for fk in &t.schema.foreign_keys {
            let Some(value) = row.get(&fk.field).filter(|v| !v.is_null()) else {
                continue;
            };
            let present = tables
                .get(&fk.references_table)
                .map(|r| r.rows.iter().any(|other| other.get(&fk.references_field) == Some(value)))
                .unwrap_or(false);
            if !present {
                let mut err = self.violation(ViolationKind::ForeignKey, table, &fk.field, None, Some(value));
                if let StoreError::Database(text) = &mut err {
                    text.push_str(&format!(
                        " is not present in table \"{}\".",
                        fk.references_table
                    ));
                }
                return Err(err);
            }
        }

        for field in &t.schema.unique {
            let Some(value) = row.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            if t.rows.iter().any(|existing| existing.get(field) == Some(value)) {
                let mut err = self.violation(ViolationKind::Unique, table, field, None, Some(value));
                if let StoreError::Database(text) = &mut err {
                    text.push_str(" already exists.");
                }
                return Err(err);
            }
        }

        if let Some(t) = tables.get_mut(table) {
            t.rows.push(row);
        }
        Ok(())
    }

    fn violation(
        &self,
        kind: ViolationKind,
        table: &str,
        field: &str,
        check_name: Option<&str>,
        value: Option<&Value>,
    ) -> StoreError {
        let constraint = match kind {
            ViolationKind::Unique => format!("{table}_{field}_key"),
            ViolationKind::ForeignKey => format!("{table}_{field}_fkey"),
            ViolationKind::NotNull => format!("{table}_{field}_not_null"),
            ViolationKind::Check => check_name
                .map(str::to_string)
                .unwrap_or_else(|| format!("{table}_{field}_check")),
        };
        let value = value.map(value_text);

        let message = match kind {
            ViolationKind::Unique => format!(
                "duplicate key value violates unique constraint \"{constraint}\"\nDETAIL: Key ({field})=({})",
                value.as_deref().unwrap_or("")
            ),
            ViolationKind::ForeignKey => format!(
                "insert or update on table \"{table}\" violates foreign key constraint \"{constraint}\"\nDETAIL: Key ({field})=({})",
                value.as_deref().unwrap_or("")
            ),
            ViolationKind::NotNull => format!(
                "null value in column \"{field}\" of relation \"{table}\" violates not-null constraint"
            ),
            ViolationKind::Check => format!(
                "new row for relation \"{table}\" violates check constraint \"{constraint}\""
            ),
        };

        match self.style {
            ErrorStyle::Text => StoreError::Database(message),
            ErrorStyle::Structured => StoreError::Constraint {
                kind,
                table: table.to_string(),
                constraint,
                field: Some(field.to_string()),
                value,
                message,
            },
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, table: &str, row: Value) -> Result<(), StoreError> {
        self.insert_row(table, row)
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    async fn export(&self, table: &str) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        tables
            .get(table)
            .map(|t| t.rows.clone())
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn poisoned() -> StoreError {
    StoreError::Database("memory store lock poisoned".to_string())
}

/// Dead-letter sink that keeps entries in memory.
#[derive(Default)]
pub struct MemoryDeadLetterSink {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn persist(&self, entry: &DeadLetterEntry) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Database("dead-letter sink lock poisoned".to_string()))?
            .push(entry.clone());
        Ok(())
    }
}
