//! Write wrapper that classifies and resolves constraint violations.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::config::ConstraintConfig;
use crate::constraints::classifier::{ChainClassifier, ClassifiedViolation, ViolationClassifier};
use crate::constraints::types::{
    ConstraintError, ConstraintViolation, ConstraintViolationError, FieldOverrides, HandledWrite,
    ResolutionStrategy, ViolationKind, WriteOperation,
};
use crate::observability::metrics;
use crate::registry::ResilienceRegistry;
use crate::store::StoreError;

/// Runs a single write and resolves the constraint violations it raises.
#[derive(Clone)]
pub struct ConstraintViolationResolver {
    registry: Arc<ResilienceRegistry>,
    classifier: Arc<dyn ViolationClassifier>,
    config: ConstraintConfig,
}

impl ConstraintViolationResolver {
    pub fn new(registry: Arc<ResilienceRegistry>, config: ConstraintConfig) -> Self {
        Self {
            registry,
            classifier: Arc::new(ChainClassifier::default()),
            config,
        }
    }

    /// Swap the classifier for one suited to a specific backend.
    pub fn with_classifier(mut self, classifier: Arc<dyn ViolationClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Fixed resolution policy.
    pub fn strategy_for(&self, kind: ViolationKind, field: Option<&str>) -> ResolutionStrategy {
        match kind {
            ViolationKind::Unique if field.is_some_and(|f| self.is_identity_field(f)) => {
                ResolutionStrategy::Manual
            }
            ViolationKind::ForeignKey => ResolutionStrategy::Fallback,
            ViolationKind::NotNull => ResolutionStrategy::Retry,
            _ => ResolutionStrategy::Skip,
        }
    }

    fn is_identity_field(&self, field: &str) -> bool {
        self.config
            .identity_fields
            .iter()
            .any(|f| f.eq_ignore_ascii_case(field))
    }

    /// Identity field named inside a constraint or index name such as `users_email_key`.
    fn identity_in_constraint(&self, constraint: &str) -> Option<String> {
        let name = format!("_{}_", constraint.to_ascii_lowercase().replace(['.', '-'], "_"));
        self.config
            .identity_fields
            .iter()
            .find(|f| name.contains(&format!("_{}_", f.to_ascii_lowercase())))
            .cloned()
    }

    /// Field a violation is attributed to. Unique violations whose reported field is
    /// missing or not an identity field are matched against the constraint name.
    fn violated_field(&self, classified: &ClassifiedViolation) -> Option<String> {
        let field = classified.field.as_deref();
        if classified.kind != ViolationKind::Unique || field.is_some_and(|f| self.is_identity_field(f)) {
            return classified.field.clone();
        }
        self.identity_in_constraint(&classified.constraint)
            .or_else(|| classified.field.clone())
    }

    /// Run `write` once and resolve any constraint violation it reports.
    ///
    /// `write` receives the field corrections to apply; they are empty on the first call.
    /// Errors that are not constraint violations come back as
    /// [`ConstraintError::Passthrough`] carrying the original error.
    pub async fn execute_with_handling<T, F, Fut>(
        &self,
        table: &str,
        operation: WriteOperation,
        fallback: Option<T>,
        mut write: F,
    ) -> Result<HandledWrite<T>, ConstraintError>
    where
        F: FnMut(FieldOverrides) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let err = match write(FieldOverrides::new()).await {
            Ok(result) => {
                return Ok(HandledWrite {
                    result: Some(result),
                    violations_handled: Vec::new(),
                    fallback_used: false,
                })
            }
            Err(e) => e,
        };

        let Some(classified) = self.classifier.classify(&err) else {
            return Err(ConstraintError::Passthrough(err));
        };
        let violation = self.record(table, operation, &classified, &err);

        match violation.strategy {
            ResolutionStrategy::Skip => {
                let violation = self.mark_resolved(violation);
                Ok(HandledWrite {
                    result: None,
                    violations_handled: vec![violation],
                    fallback_used: false,
                })
            }
            ResolutionStrategy::Fallback => match fallback {
                Some(data) => {
                    let violation = self.mark_resolved(violation);
                    Ok(HandledWrite {
                        result: Some(data),
                        violations_handled: vec![violation],
                        fallback_used: true,
                    })
                }
                None => Err(self.failed(&violation, "no fallback data supplied")),
            },
            ResolutionStrategy::Manual => {
                metrics::record_resolution(violation.strategy.as_str(), "escalated");
                tracing::warn!(
                    violation_id = %violation.id,
                    table = %violation.table,
                    constraint = %violation.constraint,
                    "Constraint violation needs manual resolution"
                );
                Err(ConstraintError::Unresolved(ConstraintViolationError::from(&violation)))
            }
            ResolutionStrategy::Retry => {
                self.retry_with_corrections(table, operation, violation, &mut write)
                    .await
            }
        }
    }

    async fn retry_with_corrections<T, F, Fut>(
        &self,
        table: &str,
        operation: WriteOperation,
        first: ConstraintViolation,
        write: &mut F,
    ) -> Result<HandledWrite<T>, ConstraintError>
    where
        F: FnMut(FieldOverrides) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut overrides = FieldOverrides::new();
        let mut handled = vec![first.clone()];
        let mut current = first;

        for attempt in 1..=self.config.max_correction_attempts {
            let Some(field) = current.field.clone() else {
                return Err(self.failed(&current, "violation names no field to correct"));
            };
            let corrected = self.default_for(&field);
            tracing::info!(
                violation_id = %current.id,
                field = %field,
                attempt,
                "Retrying write with corrected value"
            );
            overrides.set(field, corrected);

            match write(overrides.clone()).await {
                Ok(result) => {
                    let violations_handled = handled
                        .into_iter()
                        .map(|v| self.mark_resolved(v))
                        .collect();
                    return Ok(HandledWrite {
                        result: Some(result),
                        violations_handled,
                        fallback_used: false,
                    });
                }
                Err(e) => match self.classifier.classify(&e) {
                    // another missing column surfaced once the first was filled in
                    Some(next)
                        if next.kind == ViolationKind::NotNull
                            && next
                                .field
                                .as_deref()
                                .is_some_and(|f| overrides.get(f).is_none()) =>
                    {
                        let violation = self.record(table, operation, &next, &e);
                        handled.push(violation.clone());
                        current = violation;
                    }
                    _ => return Err(self.failed(&current, &e.to_string())),
                },
            }
        }

        Err(self.failed(
            &current,
            &format!(
                "still violated after {} correction attempt(s)",
                self.config.max_correction_attempts
            ),
        ))
    }

    /// Value used to fill a column rejected as null.
    fn default_for(&self, field: &str) -> Value {
        if let Some(v) = self.config.retry_defaults.get(field) {
            return v.clone();
        }
        if field.ends_with("_at") {
            Value::String(Utc::now().to_rfc3339())
        } else if field.starts_with("is_") || field.starts_with("has_") {
            Value::Bool(false)
        } else {
            Value::String(String::new())
        }
    }

    fn record(
        &self,
        table: &str,
        operation: WriteOperation,
        classified: &ClassifiedViolation,
        err: &StoreError,
    ) -> ConstraintViolation {
        let field = self.violated_field(classified);
        let strategy = self.strategy_for(classified.kind, field.as_deref());
        let violation = ConstraintViolation {
            id: Uuid::new_v4(),
            table: classified.table.clone().unwrap_or_else(|| table.to_string()),
            constraint: classified.constraint.clone(),
            kind: classified.kind,
            field,
            attempted_value: classified.value.clone(),
            raw_error: err.to_string(),
            operation,
            strategy,
            resolved: false,
            timestamp: Utc::now(),
        };

        self.registry.violations.put(violation.id, violation.clone());
        metrics::record_violation(violation.kind.as_str(), strategy.as_str());
        tracing::warn!(
            violation_id = %violation.id,
            table = %violation.table,
            kind = %violation.kind,
            constraint = %violation.constraint,
            field = ?violation.field,
            strategy = %strategy,
            "Constraint violation recorded"
        );
        violation
    }

    fn mark_resolved(&self, mut violation: ConstraintViolation) -> ConstraintViolation {
        self.registry
            .violations
            .update(&violation.id, |v| v.resolved = true);
        violation.resolved = true;
        metrics::record_resolution(violation.strategy.as_str(), "resolved");
        tracing::info!(
            violation_id = %violation.id,
            strategy = %violation.strategy,
            "Constraint violation resolved"
        );
        violation
    }

    fn failed(&self, violation: &ConstraintViolation, reason: &str) -> ConstraintError {
        metrics::record_resolution(violation.strategy.as_str(), "failed");
        tracing::error!(
            violation_id = %violation.id,
            strategy = %violation.strategy,
            reason = %reason,
            "Constraint resolution failed"
        );
        ConstraintError::ResolutionFailed {
            violation: ConstraintViolationError::from(violation),
            reason: reason.to_string(),
        }
    }

    /// Mark a violation resolved out-of-band. Returns `None` for unknown ids.
    pub fn resolve_violation(&self, id: Uuid) -> Option<ConstraintViolation> {
        let updated = self.registry.violations.update(&id, |v| {
            let changed = !v.resolved;
            v.resolved = true;
            (v.clone(), changed)
        })?;
        if updated.1 {
            tracing::info!(violation_id = %id, "Constraint violation resolved manually");
        }
        Some(updated.0)
    }

    pub fn get_violation(&self, id: Uuid) -> Option<ConstraintViolation> {
        self.registry.violations.get(&id)
    }

    /// Unresolved violations, oldest first.
    pub fn open_violations(&self) -> Vec<ConstraintViolation> {
        let mut open: Vec<_> = self
            .registry
            .violations
            .values()
            .into_iter()
            .filter(|v| !v.resolved)
            .collect();
        open.sort_by_key(|v| v.timestamp);
        open
    }
}
