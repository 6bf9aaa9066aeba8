//! Inbound webhook delivery with retries and dead-lettering.
//!
//! # Data Flow
//! ```text
//! process_with_retry(event_type, payload, endpoint_url, max_attempts)
//!     → validate input (WebhookError on rejection)
//!     → WebhookRouter → handler (attempt 1, inline)
//!         → Ok  → Resolved, no record
//!         → Err → WebhookFailureRecord (attempts = 1)
//!             → max_attempts == 1 → DeadLetter → DeadLetterSink
//!             → otherwise Retrying → retry chain task
//!
//! retry chain (one task per record)
//!     → sleep(backoff(attempts)) → handler
//!         → Ok → Resolved
//!         → Err, attempts < max → reschedule
//!         → Err, attempts = max → DeadLetter → DeadLetterSink (once)
//! ```
//!
//! # Design Decisions
//! - Each record owns a single sequential task, so retries for one id never overlap
//! - Delivery failures after the first attempt are absorbed and surface only as status
//! - Handlers are expected to be idempotent; `IdempotentHandler` helps when they are not

pub mod coordinator;
pub mod handler;
pub mod types;

pub use coordinator::WebhookRetryCoordinator;
pub use handler::{
    handler_fn, IdempotentHandler, LoggingHandler, WebhookHandler, WebhookRouter,
    DEFAULT_SEEN_CAPACITY,
};
pub use types::{
    AttemptLog, DeadLetterEntry, HandlerError, WebhookError, WebhookEvent, WebhookFailureRecord,
    WebhookOutcome, WebhookStatus,
};
