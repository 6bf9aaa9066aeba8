//! Constraint violation handling for data-store writes.
//!
//! # Data Flow
//! ```text
//! execute_with_handling(table, op, fallback, write)
//!     → write(overrides = {})
//!         → Ok(value)                      → HandledWrite { result: Some(value) }
//!         → Err(e), classifier says no     → ConstraintError::Passthrough(e)
//!         → Err(e), classified violation   → record in registry (resolved = false)
//!             → strategy_for(kind, field)
//!                 Manual   → ConstraintError::Unresolved
//!                 Fallback → HandledWrite { result: fallback }
//!                 Retry    → write(overrides = { field: default }) → resolved
//!                 Skip     → HandledWrite { result: None }
//! ```
//!
//! # Design Decisions
//! - Strategy selection is a fixed policy; identity fields are configurable
//! - A violation's `resolved` flag moves false → true once and never back
//! - Classification sits behind a trait so each backend can bring its own
//! - Retry corrections are passed to the write closure rather than mutating caller state

pub mod classifier;
pub mod resolver;
pub mod types;

pub use classifier::{
    ChainClassifier, ClassifiedViolation, PatternClassifier, StructuredClassifier,
    ViolationClassifier,
};
pub use resolver::ConstraintViolationResolver;
pub use types::{
    ConstraintError, ConstraintViolation, ConstraintViolationError, FieldOverrides, HandledWrite,
    ResolutionStrategy, ViolationKind, WriteOperation,
};
