//! Backend resilience coordinator.
//!
//! Four independent components guard a data-mutating service:
//! - [`constraints`]: classify and resolve constraint violations raised by writes
//! - [`leaks`]: track long-lived connections and clean up leaked ones
//! - [`migration`]: back up, migrate, verify and roll back
//! - [`webhooks`]: retry inbound events with capped backoff and dead-letter them
//!
//! They share only the [`registry`], which also backs the aggregate status view.

// Core components
pub mod constraints;
pub mod leaks;
pub mod migration;
pub mod webhooks;

// Shared state and collaborators
pub mod registry;
pub mod resilience;
pub mod store;

// Service surface
pub mod config;
pub mod coordinator;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::CoordinatorConfig;
pub use coordinator::{CoordinatorBuilder, ResilienceCoordinator};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use registry::{ResilienceRegistry, ResilienceStatus};
