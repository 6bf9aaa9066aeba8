//! Connection leak detection and cleanup.
//!
//! # Data Flow
//! ```text
//! register(id, kind, component, setup)
//!     → setup() once → Tracked { resource, release }
//!     → ConnectionHandle in registry.connections
//!     → per-connection sampler task (interval = sample_interval)
//!
//! sampler tick / check_connection(id)
//!     → memory > threshold OR age > max_age ?
//!         → claim() → cancel sampler → release() → remove → MemoryLeakReport
//!
//! release(id)
//!     → claim() → cancel sampler → release() → remove → final audit check
//!
//! run_sweeper (interval = sweep_interval)
//!     → sum memory over active connections → gauge + alert, no cleanup
//! ```
//!
//! # Design Decisions
//! - A compare-and-swap on the handle's `claimed` flag decides who runs the callback
//! - The sampler holds its own handle, never looks the id up again
//! - Leak detection is advisory and never returns an error to callers
//! - Memory comes from the resource itself through `LeakProbe`

pub mod monitor;
pub mod types;

pub use monitor::ConnectionLeakMonitor;
pub use types::{
    ConnectionHandle, ConnectionKind, ConnectionLease, ConnectionSummary, FixedFootprint,
    LeakError, LeakProbe, LeakReason, MemoryLeakReport, ReleaseFn, ReleaseOutcome, SweepSummary,
    Tracked,
};
