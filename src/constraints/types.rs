//! Constraint violation records, strategies and errors.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Kind of datastore constraint that rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ForeignKey,
    Unique,
    Check,
    NotNull,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::ForeignKey => "foreign_key",
            ViolationKind::Unique => "unique",
            ViolationKind::Check => "check",
            ViolationKind::NotNull => "not_null",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a violation is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Re-run the write with a corrected value for the offending field.
    Retry,
    /// Return caller-supplied fallback data without re-running the write.
    Fallback,
    /// Leave for out-of-band resolution; the call fails.
    Manual,
    /// Treat the write as a successful no-op.
    Skip,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Retry => "retry",
            ResolutionStrategy::Fallback => "fallback",
            ResolutionStrategy::Manual => "manual",
            ResolutionStrategy::Skip => "skip",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of write that produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOperation {
    Insert,
    Update,
    Upsert,
    Delete,
}

/// Audit record of a single constraint violation.
///
/// Never deleted. `resolved` flips to true at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub id: Uuid,
    pub table: String,
    pub constraint: String,
    pub kind: ViolationKind,
    pub field: Option<String>,
    /// Value the write attempted to store, as reported by the datastore.
    pub attempted_value: Option<String>,
    pub raw_error: String,
    pub operation: WriteOperation,
    pub strategy: ResolutionStrategy,
    pub resolved: bool,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a write run through the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct HandledWrite<T> {
    /// `None` when the violation was skipped.
    pub result: Option<T>,
    pub violations_handled: Vec<ConstraintViolation>,
    pub fallback_used: bool,
}

/// Corrected field values handed to the write closure on a retry.
///
/// Empty on the first attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldOverrides(BTreeMap<String, serde_json::Value>);

impl FieldOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: serde_json::Value) {
        self.0.insert(field.into(), value);
    }

    /// Write every override into a JSON object row. Non-object rows are left untouched.
    pub fn apply_to(&self, row: &mut serde_json::Value) {
        if let Some(obj) = row.as_object_mut() {
            for (field, value) in &self.0 {
                obj.insert(field.clone(), value.clone());
            }
        }
    }
}

/// A violation that reached the caller unresolved.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} constraint {constraint} violated on {table} (strategy: {strategy})")]
pub struct ConstraintViolationError {
    pub violation_id: Uuid,
    pub kind: ViolationKind,
    pub table: String,
    pub constraint: String,
    pub field: Option<String>,
    pub strategy: ResolutionStrategy,
}

impl From<&ConstraintViolation> for ConstraintViolationError {
    fn from(v: &ConstraintViolation) -> Self {
        Self {
            violation_id: v.id,
            kind: v.kind,
            table: v.table.clone(),
            constraint: v.constraint.clone(),
            field: v.field.clone(),
            strategy: v.strategy,
        }
    }
}

/// Errors returned by [`crate::constraints::ConstraintViolationResolver`].
#[derive(Debug, Error)]
pub enum ConstraintError {
    /// The write failed for a reason that is not a constraint violation.
    /// Carries the original error unchanged.
    #[error(transparent)]
    Passthrough(StoreError),

    /// The violation needs out-of-band (manual) resolution.
    #[error("unresolved: {0}")]
    Unresolved(ConstraintViolationError),

    /// A resolution strategy was applied and did not succeed.
    #[error("resolution failed for {violation}: {reason}")]
    ResolutionFailed {
        violation: ConstraintViolationError,
        reason: String,
    },
}

impl ConstraintError {
    /// The recorded violation behind this error, if any.
    pub fn violation(&self) -> Option<&ConstraintViolationError> {
        match self {
            ConstraintError::Passthrough(_) => None,
            ConstraintError::Unresolved(v) => Some(v),
            ConstraintError::ResolutionFailed { violation, .. } => Some(violation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overrides_apply_to_object_rows() {
        let mut overrides = FieldOverrides::new();
        overrides.set("status", json!("pending"));

        let mut row = json!({ "id": 1, "status": null });
        overrides.apply_to(&mut row);
        assert_eq!(row["status"], "pending");

        let mut scalar = json!(5);
        overrides.apply_to(&mut scalar);
        assert_eq!(scalar, json!(5));
    }

    #[test]
    fn kinds_serialize_snake_case() {
        assert_eq!(serde_json::to_string(&ViolationKind::ForeignKey).unwrap(), "\"foreign_key\"");
        assert_eq!(ViolationKind::NotNull.to_string(), "not_null");
        assert_eq!(ResolutionStrategy::Manual.to_string(), "manual");
    }
}
