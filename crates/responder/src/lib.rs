//! Request/response engine for OpenAI-style `/responses` endpoints:
//! pooled HTTP transport with retry and status-classified errors, an
//! SSE demuxer, and the [`Responder`] driving unary and streaming
//! calls with structured-output handling and telemetry emission.

pub mod responder;
pub mod retry;
pub mod sse;
pub mod transport;

pub use responder::{parse_response, Responder};
pub use retry::{backoff_delay, parse_retry_after, with_retry};
pub use sse::SseFrame;
pub use transport::{
    classify_status, ByteStream, HttpTransport, Method, Transport, TransportRequest,
    TransportResponse,
};
