//! Constraint violation classification.
//!
//! Drivers that report structured errors are read directly. Raw error text is matched
//! against Postgres, SQLite and MySQL phrasings as a fallback.

use regex::{Captures, Regex};

use crate::constraints::types::ViolationKind;
use crate::store::StoreError;

/// What a classifier extracted from a write error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedViolation {
    pub kind: ViolationKind,
    pub constraint: String,
    pub field: Option<String>,
    pub value: Option<String>,
    pub table: Option<String>,
}

/// Decides whether a store error is a constraint violation.
pub trait ViolationClassifier: Send + Sync {
    /// `None` means the error is not a constraint violation.
    fn classify(&self, error: &StoreError) -> Option<ClassifiedViolation>;
}

/// Reads `StoreError::Constraint`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredClassifier;

impl ViolationClassifier for StructuredClassifier {
    fn classify(&self, error: &StoreError) -> Option<ClassifiedViolation> {
        match error {
            StoreError::Constraint {
                kind,
                table,
                constraint,
                field,
                value,
                ..
            } => Some(ClassifiedViolation {
                kind: *kind,
                constraint: constraint.clone(),
                field: field.clone(),
                value: value.clone(),
                table: Some(table.clone()),
            }),
            _ => None,
        }
    }
}

struct Shape {
    kind: ViolationKind,
    pattern: Regex,
}

/// Regex matching over raw driver text.
pub struct PatternClassifier {
    shapes: Vec<Shape>,
    detail: Regex,
    relation: Regex,
}

impl PatternClassifier {
    pub fn new() -> Self {
        let shape = |kind, pattern: &str| Shape {
            kind,
            pattern: Regex::new(pattern).expect("static constraint pattern"),
        };

        let shapes = vec![
            shape(
                ViolationKind::ForeignKey,
                r#"violates foreign key constraint "(?P<constraint>[^"]+)""#,
            ),
            shape(ViolationKind::ForeignKey, r"FOREIGN KEY constraint failed"),
            shape(
                ViolationKind::Unique,
                r#"duplicate key value violates unique constraint "(?P<constraint>[^"]+)""#,
            ),
            shape(
                ViolationKind::Unique,
                r"UNIQUE constraint failed: (?P<table>\w+)\.(?P<field>\w+)",
            ),
            shape(
                ViolationKind::Unique,
                r"Duplicate entry '(?P<value>[^']*)' for key '(?P<constraint>(?:(?P<table>\w+)\.)?(?P<field>\w+))'",
            ),
            shape(
                ViolationKind::NotNull,
                r#"null value in column "(?P<field>[^"]+)"(?: of relation "(?P<table>[^"]+)")? violates not-null constraint"#,
            ),
            shape(
                ViolationKind::NotNull,
                r"NOT NULL constraint failed: (?P<table>\w+)\.(?P<field>\w+)",
            ),
            shape(
                ViolationKind::Check,
                r#"violates check constraint "(?P<constraint>[^"]+)""#,
            ),
            shape(
                ViolationKind::Check,
                r"CHECK constraint failed: (?P<constraint>\w+)",
            ),
        ];

        Self {
            shapes,
            detail: Regex::new(r"Key \((?P<field>[^)]+)\)=\((?P<value>[^)]*)\)")
                .expect("static detail pattern"),
            relation: Regex::new(r#"(?:on table|relation) "(?P<table>[^"]+)""#)
                .expect("static relation pattern"),
        }
    }

    fn classify_text(&self, text: &str) -> Option<ClassifiedViolation> {
        let (kind, caps) = self
            .shapes
            .iter()
            .find_map(|s| s.pattern.captures(text).map(|c| (s.kind, c)))?;

        let detail = self.detail.captures(text);
        let field = group(&caps, "field").or_else(|| detail.as_ref().and_then(|d| group(d, "field")));
        let value = group(&caps, "value").or_else(|| detail.as_ref().and_then(|d| group(d, "value")));
        let table = group(&caps, "table").or_else(|| {
            self.relation
                .captures(text)
                .and_then(|r| group(&r, "table"))
        });

        let constraint = group(&caps, "constraint").unwrap_or_else(|| {
            let suffix = match kind {
                ViolationKind::Unique => "key",
                ViolationKind::ForeignKey => "fkey",
                ViolationKind::NotNull => "not_null",
                ViolationKind::Check => "check",
            };
            match (&table, &field) {
                (Some(t), Some(f)) => format!("{t}_{f}_{suffix}"),
                _ => kind.as_str().to_string(),
            }
        });

        Some(ClassifiedViolation {
            kind,
            constraint,
            field,
            value,
            table,
        })
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ViolationClassifier for PatternClassifier {
    fn classify(&self, error: &StoreError) -> Option<ClassifiedViolation> {
        match error {
            StoreError::Database(text) => self.classify_text(text),
            StoreError::Constraint { message, .. } => self.classify_text(message),
            _ => None,
        }
    }
}

fn group(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name).map(|m| m.as_str().to_string())
}

/// Tries each classifier in order and returns the first match.
pub struct ChainClassifier {
    classifiers: Vec<Box<dyn ViolationClassifier>>,
}

impl ChainClassifier {
    pub fn new(classifiers: Vec<Box<dyn ViolationClassifier>>) -> Self {
        Self { classifiers }
    }
}

impl Default for ChainClassifier {
    /// Structured errors first, text patterns second.
    fn default() -> Self {
        Self::new(vec![
            Box::new(StructuredClassifier),
            Box::new(PatternClassifier::new()),
        ])
    }
}

impl ViolationClassifier for ChainClassifier {
    fn classify(&self, error: &StoreError) -> Option<ClassifiedViolation> {
        self.classifiers.iter().find_map(|c| c.classify(error))
    }
}
