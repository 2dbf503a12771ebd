//! End-to-end responder behavior over a scripted transport: retry on
//! rate limits, telemetry event pairing, and streaming assembly with
//! mid-stream failure semantics.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;

use casc_domain::cancel::CancelToken;
use casc_domain::config::{ResponderConfig, RetryConfig};
use casc_domain::error::{Error, Result};
use casc_domain::event::{EventSink, TelemetryEvent};
use casc_domain::message::Message;
use casc_domain::request::ResponsesRequest;
use casc_domain::stream::ResponseEvent;
use casc_domain::trace::Session;
use casc_responder::{ByteStream, Responder, Transport, TransportRequest, TransportResponse};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted transport & collecting sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Step {
    Ok(serde_json::Value),
    Fail(Error),
    Stream(Vec<Result<Vec<u8>>>),
}

struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            attempts: Mutex::new(Vec::new()),
        })
    }

    fn next(&self) -> Step {
        self.attempts.lock().push(Instant::now());
        self.steps.lock().pop_front().expect("script exhausted")
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _request: &TransportRequest) -> Result<TransportResponse> {
        match self.next() {
            Step::Ok(body) => Ok(TransportResponse {
                status: 200,
                body: body.to_string(),
            }),
            Step::Fail(err) => Err(err),
            Step::Stream(_) => panic!("unary call hit a stream step"),
        }
    }

    async fn stream(&self, _request: &TransportRequest) -> Result<ByteStream> {
        match self.next() {
            Step::Stream(chunks) => Ok(Box::pin(futures_util::stream::iter(chunks))),
            Step::Fail(err) => Err(err),
            Step::Ok(_) => panic!("stream call hit a unary step"),
        }
    }
}

#[derive(Default)]
struct CollectSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl EventSink for CollectSink {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}

impl CollectSink {
    fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .map(|e| match e {
                TelemetryEvent::ResponseStarted { .. } => "started",
                TelemetryEvent::ResponseCompleted { .. } => "completed",
                TelemetryEvent::ResponseFailed { .. } => "failed",
                TelemetryEvent::AgentFailed { .. } => "agent_failed",
            })
            .collect()
    }
}

fn responder(transport: Arc<ScriptedTransport>, sink: Arc<CollectSink>) -> Responder {
    let config = ResponderConfig {
        api_key: "sk-test".into(),
        retry: RetryConfig {
            max_retries: 2,
            base_delay_ms: 10,
            factor: 2.0,
            jitter: 0.2,
        },
        ..Default::default()
    };
    Responder::with_transport(config, transport).with_sink(sink)
}

fn completed_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "resp_1",
        "object": "response",
        "status": "completed",
        "output": [{
            "type": "message",
            "id": "msg_1",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text}]
        }],
        "usage": {"input_tokens": 5, "output_tokens": 1, "total_tokens": 6},
        "model": "x",
        "created_at": 1700000000
    })
}

fn request() -> ResponsesRequest {
    ResponsesRequest::builder("x")
        .input(vec![Message::user("2+2")])
        .build()
        .unwrap()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Unary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn single_turn_text_with_event_pair() {
    let transport = ScriptedTransport::new(vec![Step::Ok(completed_body("4"))]);
    let sink = Arc::new(CollectSink::default());
    let responder = responder(transport, sink.clone());

    let response = responder
        .respond(&request(), &Session::new("s1"))
        .await
        .unwrap();

    assert_eq!(response.output_text(), "4");
    assert_eq!(response.usage.total_tokens, 6);
    assert_eq!(sink.kinds(), vec!["started", "completed"]);
}

#[tokio::test]
async fn rate_limit_retry_honors_retry_after() {
    let transport = ScriptedTransport::new(vec![
        Step::Fail(Error::RateLimit {
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(1)),
        }),
        Step::Ok(completed_body("ok")),
    ]);
    let sink = Arc::new(CollectSink::default());
    let responder = responder(transport.clone(), sink.clone());

    let started = Instant::now();
    let response = responder
        .respond(&request(), &Session::new("s1"))
        .await
        .unwrap();

    assert_eq!(response.output_text(), "ok");
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(transport.attempts.lock().len(), 2);
    // The transient 429 leaves no failed event behind.
    assert_eq!(sink.kinds(), vec!["started", "completed"]);
}

#[tokio::test]
async fn non_retryable_fails_once_with_failed_event() {
    let transport =
        ScriptedTransport::new(vec![Step::Fail(Error::Authentication("bad key".into()))]);
    let sink = Arc::new(CollectSink::default());
    let responder = responder(transport.clone(), sink.clone());

    let err = responder
        .respond(&request(), &Session::new("s1"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "authentication_error");
    assert_eq!(transport.attempts.lock().len(), 1);
    assert_eq!(sink.kinds(), vec!["started", "failed"]);
}

#[tokio::test]
async fn retries_exhausted_surfaces_last_error() {
    let unavailable = || Error::Server {
        status: 503,
        message: "overloaded".into(),
    };
    let transport = ScriptedTransport::new(vec![
        Step::Fail(unavailable()),
        Step::Fail(unavailable()),
        Step::Fail(unavailable()),
    ]);
    let sink = Arc::new(CollectSink::default());
    let responder = responder(transport.clone(), sink.clone());

    let err = responder
        .respond(&request(), &Session::new("s1"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "server_error");
    // max_retries = 2 → exactly 3 attempts.
    assert_eq!(transport.attempts.lock().len(), 3);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn sse(frames: &[(&str, &str)]) -> Vec<Result<Vec<u8>>> {
    frames
        .iter()
        .map(|(event, data)| {
            let mut frame = String::new();
            if !event.is_empty() {
                frame.push_str(&format!("event: {event}\n"));
            }
            frame.push_str(&format!("data: {data}\n\n"));
            Ok(frame.into_bytes())
        })
        .collect()
}

#[tokio::test]
async fn deltas_arrive_before_completed() {
    let mut chunks = sse(&[
        ("response.output_text.delta", r#"{"delta":"Hel"}"#),
        ("response.output_text.delta", r#"{"delta":"lo"}"#),
    ]);
    chunks.extend(sse(&[(
        "response.completed",
        &serde_json::json!({"response": completed_body("Hello")}).to_string(),
    )]));
    chunks.extend(sse(&[("", "[DONE]")]));

    let transport = ScriptedTransport::new(vec![Step::Stream(chunks)]);
    let sink = Arc::new(CollectSink::default());
    let responder = responder(transport, sink.clone());

    let mut stream = responder
        .respond_stream(&request(), &Session::new("s1"), CancelToken::new())
        .await
        .unwrap();

    let mut deltas = Vec::new();
    let mut completed = None;
    while let Some(event) = stream.next().await {
        match event.unwrap() {
            ResponseEvent::TextDelta { delta } => {
                assert!(completed.is_none(), "delta after completion");
                deltas.push(delta);
            }
            ResponseEvent::Completed { response } => completed = Some(response),
            ResponseEvent::ToolCall { .. } => {}
        }
    }

    assert_eq!(deltas.join(""), "Hello");
    assert_eq!(completed.unwrap().output_text(), "Hello");
    assert_eq!(sink.kinds(), vec!["started", "completed"]);
}

#[tokio::test]
async fn stream_assembles_response_without_completed_frame() {
    let mut chunks = sse(&[
        ("response.output_text.delta", r#"{"delta":"as"}"#),
        ("response.output_text.delta", r#"{"delta":"sembled"}"#),
    ]);
    chunks.extend(sse(&[("", "[DONE]")]));

    let transport = ScriptedTransport::new(vec![Step::Stream(chunks)]);
    let sink = Arc::new(CollectSink::default());
    let responder = responder(transport, sink);

    let mut stream = responder
        .respond_stream(&request(), &Session::new("s1"), CancelToken::new())
        .await
        .unwrap();

    let mut last = None;
    while let Some(event) = stream.next().await {
        last = Some(event.unwrap());
    }
    match last {
        Some(ResponseEvent::Completed { response }) => {
            assert_eq!(response.output_text(), "assembled");
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn mid_stream_drop_yields_partial_output() {
    let mut chunks = sse(&[
        ("response.output_text.delta", r#"{"delta":"par"}"#),
        ("response.output_text.delta", r#"{"delta":"tial"}"#),
    ]);
    chunks.push(Err(Error::Connection("reset by peer".into())));

    let transport = ScriptedTransport::new(vec![Step::Stream(chunks)]);
    let sink = Arc::new(CollectSink::default());
    let responder = responder(transport, sink.clone());

    let mut stream = responder
        .respond_stream(&request(), &Session::new("s1"), CancelToken::new())
        .await
        .unwrap();

    let mut deltas = String::new();
    let mut failure = None;
    while let Some(event) = stream.next().await {
        match event {
            Ok(ResponseEvent::TextDelta { delta }) => deltas.push_str(&delta),
            Ok(_) => panic!("no completion should follow a drop"),
            Err(e) => failure = Some(e),
        }
    }

    match failure.expect("stream should fail") {
        Error::Streaming {
            partial_output,
            bytes_received,
            ..
        } => {
            // Delivered deltas and partial_output agree.
            assert_eq!(partial_output, deltas);
            assert_eq!(partial_output, "partial");
            assert!(bytes_received > 0);
        }
        other => panic!("expected streaming error, got {other:?}"),
    }
    assert_eq!(sink.kinds(), vec!["started", "failed"]);
}

#[tokio::test]
async fn cancellation_stops_stream_without_completion() {
    let mut chunks = sse(&[("response.output_text.delta", r#"{"delta":"never-ending"}"#)]);
    chunks.extend(sse(&[("response.output_text.delta", r#"{"delta":"more"}"#)]));
    chunks.extend(sse(&[("", "[DONE]")]));

    let transport = ScriptedTransport::new(vec![Step::Stream(chunks)]);
    let sink = Arc::new(CollectSink::default());
    let responder = responder(transport, sink);

    let cancel = CancelToken::new();
    let mut stream = responder
        .respond_stream(&request(), &Session::new("s1"), cancel.clone())
        .await
        .unwrap();

    // Take one delta, then cancel.
    let first = stream.next().await.unwrap().unwrap();
    assert!(matches!(first, ResponseEvent::TextDelta { .. }));
    cancel.cancel();

    while let Some(event) = stream.next().await {
        assert!(
            !matches!(event, Ok(ResponseEvent::Completed { .. })),
            "no completion after cancellation"
        );
    }
}
