//! Shared domain types for the Cascade agent framework: messages,
//! request/response payloads, tools, errors, telemetry events, prompt
//! templates, trace identity, and the configuration surface.

pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod prompt;
pub mod request;
pub mod response;
pub mod schema;
pub mod stream;
pub mod tool;
pub mod trace;

pub use cancel::CancelToken;
pub use error::{Error, ExecutionPhase, GuardrailViolation, Result};
pub use event::{ErrorInfo, EventContext, EventSink, NoopSink, TelemetryEvent};
pub use message::{Content, Message, Role};
pub use request::{ResponsesRequest, ResponsesRequestBuilder};
pub use response::{ModelPricing, ModelResponse, OutputItem, ResponseStatus, Usage};
pub use schema::OutputSchema;
pub use stream::{BoxStream, ResponseEvent};
pub use tool::{ToolCall, ToolCallOutput, ToolChoice, ToolSpec};
pub use trace::{Session, TraceContext};
