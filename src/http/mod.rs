//! HTTP surface of the coordinator service.
//!
//! # Data Flow
//! ```text
//! request
//!     → SetRequestId → PropagateRequestId → Trace → Timeout → BodyLimit
//!     → /health
//!     → /webhooks/{event_type} → WebhookRetryCoordinator::process_with_retry
//!     → /admin/* → bearer auth → registry read views
//! ```
//!
//! # Design Decisions
//! - Admin routes are only mounted when enabled in config
//! - Webhook ingestion answers 202 once the coordinator owns a failed event,
//!   so the sender does not redeliver on our retries

pub mod auth;
pub mod handlers;
pub mod server;

pub use server::{build_router, AppState, HttpServer};
