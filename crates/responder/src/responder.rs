//! The request/response engine over an OpenAI-style `/responses`
//! endpoint: payload building, retrying transport calls, response
//! parsing, streaming assembly, and best-effort telemetry emission.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;

use casc_domain::cancel::CancelToken;
use casc_domain::config::ResponderConfig;
use casc_domain::error::{Error, ExecutionPhase, Result};
use casc_domain::event::{ErrorInfo, EventContext, EventSink, NoopSink, TelemetryEvent};
use casc_domain::message::{Content, Message, Role};
use casc_domain::request::ResponsesRequest;
use casc_domain::response::{ModelResponse, OutputItem, ResponseStatus, Usage};
use casc_domain::stream::{BoxStream, ResponseEvent};
use casc_domain::trace::Session;

use crate::retry::with_retry;
use crate::sse::{frame_stream, SseFrame};
use crate::transport::{HttpTransport, Transport, TransportRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drives `/responses` calls. Owns the transport; telemetry goes
/// through an injected [`EventSink`] and never blocks the call path.
pub struct Responder {
    config: ResponderConfig,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
}

impl Responder {
    /// Production construction: pooled HTTP transport, no-op sink.
    pub fn new(config: ResponderConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(Duration::from_millis(
            config.timeout_ms,
        ))?);
        Ok(Self {
            config,
            transport,
            sink: Arc::new(NoopSink),
        })
    }

    /// Swap the transport (tests, recordings).
    pub fn with_transport(config: ResponderConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.config.base_url.trim_end_matches('/'))
    }

    fn build_transport_request(
        &self,
        request: &ResponsesRequest,
        session: &Session,
        stream: bool,
    ) -> TransportRequest {
        let mut body = request.to_wire();
        body["stream"] = Value::Bool(stream);

        let accept = if stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        TransportRequest::post(self.endpoint(), body)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Accept", accept)
            .header("x-session-id", session.session_id.clone())
    }

    fn cost_for(&self, model: &str, usage: &Usage) -> Option<f64> {
        self.config
            .pricing
            .get(model)
            .map(|pricing| pricing.estimate_cost(usage))
    }

    // ── Unary ─────────────────────────────────────────────────────

    /// Send the request and await the full response.
    ///
    /// Transport-level retry happens here; once retries are exhausted
    /// the classified error surfaces and a `ResponseFailed` event is
    /// emitted.
    pub async fn respond(
        &self,
        request: &ResponsesRequest,
        session: &Session,
    ) -> Result<ModelResponse> {
        let span = session.trace.child();
        let context = EventContext::new(&session.session_id, &span);
        self.sink.emit(TelemetryEvent::ResponseStarted {
            context: context.clone(),
            model: request.model.clone(),
        });

        let transport_request = self.build_transport_request(request, session, false);
        let outcome = with_retry(&self.config.retry, || async {
            self.transport.send(&transport_request).await
        })
        .await;

        match outcome {
            Ok(raw) => {
                let result = raw
                    .json()
                    .and_then(|body| self.finish_response(body, request));
                match &result {
                    Ok(response) => {
                        self.sink.emit(TelemetryEvent::ResponseCompleted {
                            context: context.clone().finish(),
                            model: response.model.clone(),
                            usage: response.usage,
                            cost_usd: response.cost_usd,
                        });
                    }
                    Err(err) => self.emit_failure(&context, &request.model, err),
                }
                result
            }
            Err(err) => {
                self.emit_failure(&context, &request.model, &err);
                Err(err)
            }
        }
    }

    // ── Streaming ─────────────────────────────────────────────────

    /// Send the request and stream typed events.
    ///
    /// Every `TextDelta` is delivered before the terminal `Completed`;
    /// nothing follows an error item or a cancellation. Structured
    /// parsing, when requested, runs against the final assembled text.
    pub async fn respond_stream(
        &self,
        request: &ResponsesRequest,
        session: &Session,
        cancel: CancelToken,
    ) -> Result<BoxStream<'static, Result<ResponseEvent>>> {
        let span = session.trace.child();
        let context = EventContext::new(&session.session_id, &span);
        self.sink.emit(TelemetryEvent::ResponseStarted {
            context: context.clone(),
            model: request.model.clone(),
        });

        let transport_request = self.build_transport_request(request, session, true);
        let connect = with_retry(&self.config.retry, || async {
            self.transport.stream(&transport_request).await
        })
        .await;

        let bytes = match connect {
            Ok(bytes) => bytes,
            Err(err) => {
                self.emit_failure(&context, &request.model, &err);
                return Err(err);
            }
        };

        let mut frames = frame_stream(bytes, delta_of_frame);
        let request = request.clone();
        let sink = self.sink.clone();
        let pricing = self.config.pricing.clone();

        let stream = async_stream::stream! {
            let mut text_buf = String::new();
            let mut completed: Option<ModelResponse> = None;

            while let Some(item) = frames.next().await {
                if cancel.is_cancelled() {
                    tracing::debug!(session_id = %context.session_id, "stream cancelled");
                    return;
                }
                let frame = match item {
                    Ok(frame) => frame,
                    Err(err) => {
                        sink.emit(TelemetryEvent::ResponseFailed {
                            context: context.clone().finish(),
                            model: request.model.clone(),
                            error: ErrorInfo::from_error(&err),
                        });
                        yield Err(err);
                        return;
                    }
                };

                if frame.is_done() {
                    break;
                }
                match frame.event.as_deref() {
                    Some("response.output_text.delta") => {
                        if let Some(delta) = delta_of_frame(&frame) {
                            text_buf.push_str(&delta);
                            yield Ok(ResponseEvent::TextDelta { delta });
                        }
                    }
                    Some("response.output_item.done") => {
                        if let Some(event) = tool_call_of_frame(&frame) {
                            yield Ok(event);
                        }
                    }
                    Some("response.completed") => {
                        match serde_json::from_str::<Value>(&frame.data) {
                            Ok(value) => {
                                let body = value.get("response").cloned().unwrap_or(value);
                                match parse_response(&body) {
                                    Ok(parsed) => completed = Some(parsed),
                                    Err(err) => {
                                        yield Err(err);
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                yield Err(Error::Json(e));
                                return;
                            }
                        }
                    }
                    _ => {} // in_progress, created, etc.
                }
            }

            // Assemble when the server never sent a completed object.
            let mut response = completed.unwrap_or_else(|| ModelResponse {
                id: format!("resp_stream_{}", uuid::Uuid::new_v4().simple()),
                status: ResponseStatus::Completed,
                output: vec![OutputItem::Message(Message {
                    role: Role::Assistant,
                    content: vec![Content::text(text_buf.clone())],
                    id: Some(format!("msg_{}", uuid::Uuid::new_v4().simple())),
                    parsed: None,
                })],
                usage: Usage::default(),
                model: request.model.clone(),
                created_at: chrono::Utc::now().timestamp(),
                cost_usd: None,
                finish_reason: None,
            });
            response.cost_usd = pricing
                .get(&response.model)
                .map(|p| p.estimate_cost(&response.usage));

            if let Err(err) = attach_parsed(&mut response, &request) {
                sink.emit(TelemetryEvent::ResponseFailed {
                    context: context.clone().finish(),
                    model: request.model.clone(),
                    error: ErrorInfo::from_error(&err),
                });
                yield Err(err);
                return;
            }

            sink.emit(TelemetryEvent::ResponseCompleted {
                context: context.clone().finish(),
                model: response.model.clone(),
                usage: response.usage,
                cost_usd: response.cost_usd,
            });
            yield Ok(ResponseEvent::Completed { response });
        };
        Ok(Box::pin(stream))
    }

    // ── Internals ─────────────────────────────────────────────────

    fn finish_response(
        &self,
        body: Value,
        request: &ResponsesRequest,
    ) -> Result<ModelResponse> {
        let mut response = parse_response(&body)?;
        response.cost_usd = self.cost_for(&response.model, &response.usage);
        attach_parsed(&mut response, request)?;
        Ok(response)
    }

    fn emit_failure(&self, context: &EventContext, model: &str, err: &Error) {
        self.sink.emit(TelemetryEvent::ResponseFailed {
            context: context.clone().finish(),
            model: model.to_string(),
            error: ErrorInfo::from_error(err),
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn delta_of_frame(frame: &SseFrame) -> Option<String> {
    if frame.event.as_deref() != Some("response.output_text.delta") {
        return None;
    }
    let value: Value = serde_json::from_str(&frame.data).ok()?;
    value.get("delta")?.as_str().map(str::to_owned)
}

fn tool_call_of_frame(frame: &SseFrame) -> Option<ResponseEvent> {
    let value: Value = serde_json::from_str(&frame.data).ok()?;
    let item = value.get("item")?;
    if item.get("type")?.as_str()? != "function_call" {
        return None;
    }
    Some(ResponseEvent::ToolCall {
        call_id: item.get("call_id")?.as_str()?.to_string(),
        name: item.get("name")?.as_str()?.to_string(),
        arguments: item
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or("{}")
            .to_string(),
    })
}

/// Parse a `/responses` body into a [`ModelResponse`].
pub fn parse_response(body: &Value) -> Result<ModelResponse> {
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidRequest("response missing 'id'".into()))?
        .to_string();

    let status = match body.get("status").and_then(Value::as_str) {
        Some("completed") | None => ResponseStatus::Completed,
        Some("in_progress") => ResponseStatus::InProgress,
        Some("failed") => ResponseStatus::Failed,
        Some("cancelled") => ResponseStatus::Cancelled,
        Some(other) => {
            return Err(Error::InvalidRequest(format!(
                "unknown response status '{other}'"
            )))
        }
    };

    let output = body
        .get("output")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_output_item).collect())
        .unwrap_or_default();

    let usage = body.get("usage").map(parse_usage).unwrap_or_default();
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let created_at = body.get("created_at").and_then(Value::as_i64).unwrap_or(0);
    let finish_reason = body
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(String::from);

    Ok(ModelResponse {
        id,
        status,
        output,
        usage,
        model,
        created_at,
        cost_usd: None,
        finish_reason,
    })
}

fn parse_output_item(item: &Value) -> Option<OutputItem> {
    match item.get("type").and_then(Value::as_str) {
        Some("message") => {
            let id = item.get("id").and_then(Value::as_str).map(String::from);
            let content = item
                .get("content")
                .and_then(Value::as_array)
                .map(|parts| parts.iter().filter_map(parse_content_part).collect())
                .unwrap_or_default();
            Some(OutputItem::Message(Message {
                role: Role::Assistant,
                content,
                id,
                parsed: None,
            }))
        }
        Some("function_call") => Some(OutputItem::FunctionCall {
            call_id: item.get("call_id")?.as_str()?.to_string(),
            name: item.get("name")?.as_str()?.to_string(),
            arguments: item
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}")
                .to_string(),
        }),
        Some("reasoning") => {
            let summary = item
                .get("summary")
                .and_then(Value::as_array)
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| {
                            p.as_str()
                                .map(String::from)
                                .or_else(|| p.get("text")?.as_str().map(String::from))
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(OutputItem::Reasoning { summary })
        }
        _ => None,
    }
}

fn parse_content_part(part: &Value) -> Option<Content> {
    match part.get("type").and_then(Value::as_str) {
        Some("output_text") | Some("text") => Some(Content::Text {
            text: part.get("text")?.as_str()?.to_string(),
        }),
        _ => None,
    }
}

fn parse_usage(value: &Value) -> Usage {
    Usage {
        input_tokens: value
            .get("input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        output_tokens: value
            .get("output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        total_tokens: value
            .get("total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        cached_tokens: value
            .get("cached_tokens")
            .and_then(Value::as_u64)
            .map(|v| v as u32),
    }
}

/// When the request carried a structured-output schema, parse the first
/// assistant text into `parsed`. Failures map to the parsing phase.
fn attach_parsed(response: &mut ModelResponse, request: &ResponsesRequest) -> Result<()> {
    let Some(ref schema) = request.output_schema else {
        return Ok(());
    };
    let text = response.output_text();
    if text.is_empty() {
        return Ok(()); // tool-call turn; nothing to parse yet
    }
    let parsed = schema.parse_value(&text).map_err(|e| Error::AgentExecution {
        phase: ExecutionPhase::Parsing,
        turns_completed: 0,
        message: format!("structured output did not match schema: {e}"),
    })?;
    if let Some(message) = response.first_assistant_message_mut() {
        message.parsed = Some(parsed);
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
