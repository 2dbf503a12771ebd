//! Typed telemetry events emitted by the responder and the agent
//! runtime, fanned out by the telemetry bus.

use serde::{Deserialize, Serialize};

use crate::error::ExecutionPhase;
use crate::response::Usage;
use crate::trace::TraceContext;

/// Identity fields shared by every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventContext {
    pub session_id: String,
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    /// Unix nanoseconds.
    pub started_at_ns: i64,
    /// Unix nanoseconds.
    pub ended_at_ns: i64,
}

impl EventContext {
    pub fn new(session_id: impl Into<String>, trace: &TraceContext) -> Self {
        let now = now_ns();
        Self {
            session_id: session_id.into(),
            trace_id: trace.trace_id.clone(),
            span_id: trace.span_id.clone(),
            parent_span_id: None,
            started_at_ns: now,
            ended_at_ns: now,
        }
    }

    pub fn finish(mut self) -> Self {
        self.ended_at_ns = now_ns();
        self
    }
}

/// Current wall clock as unix nanoseconds.
pub fn now_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

/// Error descriptor attached to failure events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl ErrorInfo {
    pub fn from_error(err: &crate::error::Error) -> Self {
        Self {
            code: err.code().into(),
            message: err.to_string(),
            retryable: err.retryable(),
            http_status: err.http_status(),
        }
    }
}

/// Events observable on the telemetry bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    ResponseStarted {
        #[serde(flatten)]
        context: EventContext,
        model: String,
    },
    ResponseCompleted {
        #[serde(flatten)]
        context: EventContext,
        model: String,
        usage: Usage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
    },
    ResponseFailed {
        #[serde(flatten)]
        context: EventContext,
        model: String,
        error: ErrorInfo,
    },
    AgentFailed {
        #[serde(flatten)]
        context: EventContext,
        agent: String,
        phase: ExecutionPhase,
        turns_completed: u32,
        error: ErrorInfo,
    },
}

impl TelemetryEvent {
    pub fn context(&self) -> &EventContext {
        match self {
            TelemetryEvent::ResponseStarted { context, .. }
            | TelemetryEvent::ResponseCompleted { context, .. }
            | TelemetryEvent::ResponseFailed { context, .. }
            | TelemetryEvent::AgentFailed { context, .. } => context,
        }
    }

    /// Short span name used by exporters.
    pub fn span_name(&self) -> &'static str {
        match self {
            TelemetryEvent::ResponseStarted { .. } => "response.started",
            TelemetryEvent::ResponseCompleted { .. } => "response",
            TelemetryEvent::ResponseFailed { .. } => "response",
            TelemetryEvent::AgentFailed { .. } => "agent",
        }
    }
}

/// Receiver for telemetry events.
///
/// The responder and the agent runtime emit through this trait so they
/// stay decoupled from the bus implementation. Emission is best-effort:
/// implementations must not block the caller or propagate failures.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: TelemetryEvent) {}
}
