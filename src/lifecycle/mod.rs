//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Logging → Metrics → Coordinator → Leak sweeper → Listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → stop accepting → sweeper exits
//!     → abort webhook retries → release tracked connections
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Background tasks subscribe to one broadcast channel

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
