use serde::{Deserialize, Serialize};

use super::ConfigIssue;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batching service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Queue size that triggers an immediate flush.
    #[serde(default = "d_max_batch_size")]
    pub max_batch_size: usize,
    /// Wall time since the first queued message before a forced flush.
    #[serde(default = "d_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Quiet period since the last queued message before a flush.
    /// Shrinks as the queue grows (see the service docs).
    #[serde(default = "d_silence_threshold_ms")]
    pub silence_threshold_ms: u64,
    /// Cap on concurrently-processing users.
    #[serde(default = "d_max_concurrent_users")]
    pub max_concurrent_users: usize,
    #[serde(default)]
    pub error_strategy: ErrorStrategy,
    #[serde(default)]
    pub backpressure: BackpressurePolicy,
    /// Slots empty and idle longer than this are evicted.
    #[serde(default = "d_idle_eviction_ms")]
    pub idle_eviction_ms: u64,
    /// Retry settings when `error_strategy = "retry"`.
    #[serde(default = "d_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "d_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// How long a blocked submitter waits when `backpressure = "block"`.
    #[serde(default = "d_block_timeout_ms")]
    pub block_timeout_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: d_max_batch_size(),
            max_wait_ms: d_max_wait_ms(),
            silence_threshold_ms: d_silence_threshold_ms(),
            max_concurrent_users: d_max_concurrent_users(),
            error_strategy: ErrorStrategy::default(),
            backpressure: BackpressurePolicy::default(),
            idle_eviction_ms: d_idle_eviction_ms(),
            retry_max_attempts: d_retry_max_attempts(),
            retry_base_delay_ms: d_retry_base_delay_ms(),
            block_timeout_ms: d_block_timeout_ms(),
        }
    }
}

impl BatchingConfig {
    pub(super) fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        if self.max_batch_size == 0 {
            issues.push(ConfigIssue::error("batching.max_batch_size", "must be at least 1"));
        }
        if self.max_concurrent_users == 0 {
            issues.push(ConfigIssue::error(
                "batching.max_concurrent_users",
                "must be at least 1",
            ));
        }
        if self.silence_threshold_ms > self.max_wait_ms {
            issues.push(ConfigIssue::warning(
                "batching.silence_threshold_ms",
                "exceeds max_wait_ms; the timeout trigger will always fire first",
            ));
        }
    }
}

fn d_max_batch_size() -> usize {
    10
}

fn d_max_wait_ms() -> u64 {
    30_000
}

fn d_silence_threshold_ms() -> u64 {
    3_000
}

fn d_max_concurrent_users() -> usize {
    16
}

fn d_idle_eviction_ms() -> u64 {
    600_000
}

fn d_retry_max_attempts() -> u32 {
    3
}

fn d_retry_base_delay_ms() -> u64 {
    1_000
}

fn d_block_timeout_ms() -> u64 {
    5_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What to do when the batch processor fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Re-enqueue the batch with capped attempts and back-off.
    #[default]
    Retry,
    /// Hand the batch to the dead-letter hook.
    DeadLetter,
    /// Discard the batch, log at warn.
    Drop,
    /// Discard silently (debug log only).
    Ignore,
}

/// What to do when a mailbox is full while its slot is processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Fail the submit.
    #[default]
    Reject,
    /// Block the submitter until space frees (bounded by block_timeout).
    Block,
    /// Evict the oldest queued message to make room.
    DropOldest,
}
