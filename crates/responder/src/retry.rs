//! Exponential back-off with jitter for transient HTTP failures.
//!
//! The policy retries only errors classified retryable by the status
//! mapping (429, 5xx, transport I/O, 408/425). A `Retry-After` value
//! parsed from the response, when present on the error, overrides the
//! computed delay for the next attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use casc_domain::config::RetryConfig;
use casc_domain::error::{Error, Result};

/// Compute the back-off delay for a given attempt (0-based), with
/// deterministic-per-call jitter of ±`jitter` around the exponential
/// value.
///
/// Jitter is derived from UUID random material instead of an RNG
/// dependency; uniformity over a few bytes is plenty for back-off
/// spreading.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_delay_ms as f64 * config.factor.powi(attempt as i32);
    let jitter_range = base * config.jitter;
    let unit = jitter_unit(); // in [0, 1)
    let delay = base - jitter_range + unit * (2.0 * jitter_range);
    Duration::from_millis(delay.max(0.0) as u64)
}

fn jitter_unit() -> f64 {
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    raw as f64 / (u32::MAX as f64 + 1.0)
}

/// Run `operation` up to `max_retries + 1` times.
///
/// Non-retryable errors surface immediately. Between attempts the task
/// sleeps for the back-off delay, or for the server-provided
/// `Retry-After` when the error carried one.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.retryable() {
                    return Err(err);
                }
                if attempt < config.max_retries {
                    let delay = retry_after_of(&err)
                        .unwrap_or_else(|| backoff_delay(config, attempt));
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    sleep(delay).await;
                }
                last_error = Some(err);
            }
        }
    }

    // max_retries + 1 attempts all failed retryably.
    Err(last_error.unwrap_or_else(|| Error::Connection("retry exhausted".into())))
}

fn retry_after_of(err: &Error) -> Option<Duration> {
    match err {
        Error::RateLimit { retry_after, .. } => *retry_after,
        _ => None,
    }
}

/// Parse a `Retry-After` header value: either delta-seconds or an
/// HTTP-date (RFC 2822).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    delta.to_std().ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
