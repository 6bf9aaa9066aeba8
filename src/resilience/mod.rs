//! Shared resilience primitives.
//!
//! # Data Flow
//! ```text
//! webhooks/coordinator.rs
//!     → backoff.rs (delay before attempt n+1)
//!     → tokio::time::sleep in the record's retry chain
//! ```
//!
//! # Design Decisions
//! - Deterministic delays, no jitter
//! - Growth is capped; the cap is reached on attempt 5 with the default settings

pub mod backoff;

pub use backoff::{calculate_backoff, webhook_backoff};
