//! Trace/span identifiers and session identity.
//!
//! Identifiers follow OTEL conventions: 128-bit trace ids and 64-bit
//! span ids, hex-encoded. UUID v4 supplies the random material so no
//! extra RNG dependency is needed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A trace id plus the current span id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// 32 lowercase hex chars.
    pub trace_id: String,
    /// 16 lowercase hex chars.
    pub span_id: String,
}

impl TraceContext {
    /// Start a fresh trace with a root span.
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
        }
    }

    /// Derive a child span in the same trace.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
        }
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

fn new_span_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..16].to_string()
}

/// Session identity threaded through a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Stable across turns of one conversation.
    pub session_id: String,
    /// Vendor-assigned conversation id, when the API returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub trace: TraceContext,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            conversation_id: None,
            trace: TraceContext::new(),
        }
    }
}
