//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! constraints/, leaks/, migration/, webhooks/
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Components call named `record_*` helpers instead of the macros directly
//! - Metric updates are no-ops until a recorder is installed, so tests need no setup
//! - Log level comes from config and can be overridden by `RUST_LOG`

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
