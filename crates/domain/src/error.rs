use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution phases
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The stage of an agent turn in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionPhase {
    InputGuardrail,
    LlmCall,
    ToolExecution,
    OutputGuardrail,
    Handoff,
    Parsing,
    MaxTurnsExceeded,
}

impl std::fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionPhase::InputGuardrail => "INPUT_GUARDRAIL",
            ExecutionPhase::LlmCall => "LLM_CALL",
            ExecutionPhase::ToolExecution => "TOOL_EXECUTION",
            ExecutionPhase::OutputGuardrail => "OUTPUT_GUARDRAIL",
            ExecutionPhase::Handoff => "HANDOFF",
            ExecutionPhase::Parsing => "PARSING",
            ExecutionPhase::MaxTurnsExceeded => "MAX_TURNS_EXCEEDED",
        };
        f.write_str(s)
    }
}

/// Which guardrail list vetoed the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardrailViolation {
    Input,
    Output,
}

impl std::fmt::Display for GuardrailViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardrailViolation::Input => f.write_str("INPUT"),
            GuardrailViolation::Output => f.write_str("OUTPUT"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error taxonomy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared error type used across all Cascade crates.
///
/// Every variant maps to a stable `code()`, a `retryable()` flag, and
/// an optional `suggestion()` shown to operators.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP 401/403 from the model API.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// HTTP 429. `retry_after` is parsed from the `Retry-After` header
    /// when the server provided one.
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// HTTP 4xx other than 401/403/429.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP 5xx.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Transport-level I/O failure (connect, DNS, broken pipe).
    #[error("connection error: {0}")]
    Connection(String),

    /// A streaming response died mid-flight. `partial_output` carries
    /// the concatenation of all text deltas delivered before the drop.
    #[error("stream interrupted after {bytes_received} bytes: {message}")]
    Streaming {
        message: String,
        partial_output: String,
        bytes_received: u64,
    },

    /// Builder or input validation failure.
    #[error("configuration: {0}")]
    Configuration(String),

    /// A guardrail vetoed the input or the output.
    #[error("{violation} guardrail blocked: {reason}")]
    Guardrail {
        violation: GuardrailViolation,
        reason: String,
        guardrail: Option<String>,
    },

    /// A tool callback raised.
    #[error("tool '{tool_name}' failed (call {call_id}): {message}")]
    ToolExecution {
        tool_name: String,
        call_id: String,
        arguments: String,
        message: String,
    },

    /// Tool plan validation, cycle detection, or step failure.
    #[error("tool plan: {message}")]
    ToolPlan {
        step_id: Option<String>,
        message: String,
    },

    /// Wraps any failure with the agent phase and turn count at the
    /// time it occurred.
    #[error("agent failed in {phase} after {turns_completed} turn(s): {message}")]
    AgentExecution {
        phase: ExecutionPhase,
        turns_completed: u32,
        message: String,
    },
}

impl Error {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Authentication(_) => "authentication_error",
            Error::RateLimit { .. } => "rate_limit_error",
            Error::InvalidRequest(_) => "invalid_request_error",
            Error::Server { .. } => "server_error",
            Error::Connection(_) => "connection_error",
            Error::Streaming { .. } => "streaming_error",
            Error::Configuration(_) => "configuration_error",
            Error::Guardrail { .. } => "guardrail_error",
            Error::ToolExecution { .. } => "tool_execution_error",
            Error::ToolPlan { .. } => "tool_plan_error",
            Error::AgentExecution { .. } => "agent_execution_error",
        }
    }

    /// Whether the operation can be retried as-is.
    ///
    /// Streaming errors are not retryable at this layer: the upstream
    /// protocol has no resume, so the caller decides whether to restart
    /// from scratch.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimit { .. } | Error::Server { .. } | Error::Connection(_)
        )
    }

    /// A short operator-facing hint, when one exists.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Authentication(_) => Some("check the configured API key"),
            Error::RateLimit { .. } => {
                Some("reduce request rate or honor the Retry-After delay")
            }
            Error::Connection(_) => Some("check network connectivity and the base URL"),
            Error::Configuration(_) => Some("fix the configuration and rebuild"),
            Error::Streaming { .. } => {
                Some("restart the request; partial output is attached to the error")
            }
            _ => None,
        }
    }

    /// The HTTP status associated with the error, when one exists.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Authentication(_) => Some(401),
            Error::RateLimit { .. } => Some(429),
            Error::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::RateLimit {
            message: "slow down".into(),
            retry_after: None
        }
        .retryable());
        assert!(Error::Server {
            status: 503,
            message: "overloaded".into()
        }
        .retryable());
        assert!(Error::Connection("reset".into()).retryable());

        assert!(!Error::Authentication("bad key".into()).retryable());
        assert!(!Error::InvalidRequest("bad schema".into()).retryable());
        assert!(!Error::Streaming {
            message: "dropped".into(),
            partial_output: "hel".into(),
            bytes_received: 3,
        }
        .retryable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::Authentication("x".into()).code(), "authentication_error");
        assert_eq!(
            Error::ToolPlan {
                step_id: None,
                message: "cycle".into()
            }
            .code(),
            "tool_plan_error"
        );
    }

    #[test]
    fn phase_wire_format_is_screaming_snake() {
        let json = serde_json::to_string(&ExecutionPhase::MaxTurnsExceeded).unwrap();
        assert_eq!(json, r#""MAX_TURNS_EXCEEDED""#);
        let back: ExecutionPhase = serde_json::from_str(r#""TOOL_EXECUTION""#).unwrap();
        assert_eq!(back, ExecutionPhase::ToolExecution);
    }

    #[test]
    fn agent_execution_display_carries_context() {
        let err = Error::AgentExecution {
            phase: ExecutionPhase::Handoff,
            turns_completed: 3,
            message: "unknown target".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("HANDOFF"));
        assert!(msg.contains("3 turn(s)"));
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(Error::Authentication("x".into()).http_status(), Some(401));
        assert_eq!(
            Error::Server {
                status: 502,
                message: "bad gateway".into()
            }
            .http_status(),
            Some(502)
        );
        assert_eq!(Error::Connection("x".into()).http_status(), None);
    }
}
