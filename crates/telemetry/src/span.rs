//! Telemetry event → OTLP span conversion.
//!
//! Span attributes follow the GenAI semantic conventions: `session.id`,
//! `gen_ai.request.model`, `gen_ai.usage.*`; failed events add
//! `error.type`, `error.code`, `http.status_code` and an ERROR status.

use serde_json::Value;

use casc_domain::event::{ErrorInfo, EventContext, TelemetryEvent};
use casc_domain::response::Usage;

const STATUS_OK: u64 = 1;
const STATUS_ERROR: u64 = 2;

/// Convert one event into an OTLP/JSON span object.
pub fn event_to_span(event: &TelemetryEvent) -> Value {
    let context = event.context();
    let mut attributes = vec![string_attr("session.id", &context.session_id)];
    let mut status = serde_json::json!({"code": STATUS_OK});
    let mut name = event.span_name().to_string();

    match event {
        TelemetryEvent::ResponseStarted { model, .. } => {
            attributes.push(string_attr("gen_ai.request.model", model));
        }
        TelemetryEvent::ResponseCompleted {
            model,
            usage,
            cost_usd,
            ..
        } => {
            attributes.push(string_attr("gen_ai.request.model", model));
            attributes.extend(usage_attrs(usage));
            if let Some(cost) = cost_usd {
                attributes.push(double_attr("gen_ai.usage.cost_usd", *cost));
            }
        }
        TelemetryEvent::ResponseFailed { model, error, .. } => {
            attributes.push(string_attr("gen_ai.request.model", model));
            attributes.extend(error_attrs(error));
            status = serde_json::json!({"code": STATUS_ERROR, "message": error.message});
        }
        TelemetryEvent::AgentFailed {
            agent,
            phase,
            turns_completed,
            error,
            ..
        } => {
            name = format!("agent.{agent}");
            attributes.push(string_attr("cascade.agent.name", agent));
            attributes.push(string_attr("cascade.agent.phase", &phase.to_string()));
            attributes.push(int_attr("cascade.agent.turns_completed", *turns_completed as i64));
            attributes.extend(error_attrs(error));
            status = serde_json::json!({"code": STATUS_ERROR, "message": error.message});
        }
    }

    span_envelope(context, &name, attributes, status)
}

fn span_envelope(
    context: &EventContext,
    name: &str,
    attributes: Vec<Value>,
    status: Value,
) -> Value {
    let mut span = serde_json::json!({
        "traceId": context.trace_id,
        "spanId": context.span_id,
        "name": name,
        "kind": 1,
        "startTimeUnixNano": context.started_at_ns.to_string(),
        "endTimeUnixNano": context.ended_at_ns.to_string(),
        "attributes": attributes,
        "status": status,
    });
    if let Some(ref parent) = context.parent_span_id {
        span["parentSpanId"] = Value::String(parent.clone());
    }
    span
}

fn usage_attrs(usage: &Usage) -> Vec<Value> {
    vec![
        int_attr("gen_ai.usage.input_tokens", usage.input_tokens as i64),
        int_attr("gen_ai.usage.output_tokens", usage.output_tokens as i64),
        int_attr("gen_ai.usage.total_tokens", usage.total_tokens as i64),
    ]
}

fn error_attrs(error: &ErrorInfo) -> Vec<Value> {
    let mut attrs = vec![
        string_attr("error.type", &error.code),
        string_attr("error.code", &error.code),
        bool_attr("error.retryable", error.retryable),
    ];
    if let Some(status) = error.http_status {
        attrs.push(int_attr("http.status_code", status as i64));
    }
    attrs
}

fn string_attr(key: &str, value: &str) -> Value {
    serde_json::json!({"key": key, "value": {"stringValue": value}})
}

fn int_attr(key: &str, value: i64) -> Value {
    // OTLP/JSON encodes 64-bit integers as strings.
    serde_json::json!({"key": key, "value": {"intValue": value.to_string()}})
}

fn double_attr(key: &str, value: f64) -> Value {
    serde_json::json!({"key": key, "value": {"doubleValue": value}})
}

fn bool_attr(key: &str, value: bool) -> Value {
    serde_json::json!({"key": key, "value": {"boolValue": value}})
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
