use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use casc_domain::error::Result;

/// One queued inbound message.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub id: String,
    pub text: String,
    pub arrived_at: Instant,
}

impl PendingMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            text: text.into(),
            arrived_at: Instant::now(),
        }
    }
}

/// Why a slot flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlushReason {
    /// Wall time since the first queued message exceeded `max_wait`.
    Timeout,
    /// Quiet period since the last queued message exceeded the
    /// (adaptive) silence threshold.
    Silence,
    /// The queue reached `max_batch_size`.
    BufferFull,
    /// Explicit flush signal.
    Unknown,
}

/// Metadata handed to the processor alongside the batch.
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub batch_id: String,
    pub first_message_id: String,
    pub last_message_id: String,
    pub reason: FlushReason,
    /// 0 on the first delivery, incremented per retry.
    pub retry_attempt: u32,
}

/// Consumes flushed batches. At most one call per user is in flight at
/// any time; different users run in parallel up to the configured cap.
#[async_trait]
pub trait BatchProcessor: Send + Sync + 'static {
    async fn process(
        &self,
        user_id: &str,
        batch: &[PendingMessage],
        context: &BatchContext,
    ) -> Result<()>;
}

/// What happened to a submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Queued; a flush trigger will deliver it later.
    Queued { queue_len: usize },
    /// Queued, and the submit itself triggered a buffer-full flush.
    FlushTriggered,
    /// Rejected by the back-pressure policy.
    Rejected,
    /// Queued after evicting the oldest message (drop-oldest policy).
    DroppedOldest,
}
