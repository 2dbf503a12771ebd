//! Per-user message batching: bounded mailboxes flushed on timeout,
//! silence, buffer-full, or an explicit signal, delivered to a
//! processor with bounded cross-user concurrency.

pub mod service;
pub mod types;

pub use service::BatchingService;
pub use types::{BatchContext, BatchProcessor, FlushReason, PendingMessage, SubmitOutcome};
