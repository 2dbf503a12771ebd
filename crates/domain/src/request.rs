use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::schema::OutputSchema;
use crate::tool::{ToolChoice, ToolSpec};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One request against the `/responses` endpoint.
///
/// Built through [`ResponsesRequest::builder`], which enforces the
/// payload invariants (`model` required, `0 ≤ temperature ≤ 2`,
/// `0 < top_p ≤ 1`, `max_tool_calls ≥ 0`).
#[derive(Debug, Clone)]
pub struct ResponsesRequest {
    pub model: String,
    /// Developer-message convenience: sent as `instructions`.
    pub instructions: Option<String>,
    /// Ordered input: messages plus prior tool-call outputs.
    pub input: Vec<Message>,
    pub max_output_tokens: Option<u32>,
    pub max_tool_calls: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
    /// Structured-output descriptor; when set the strict JSON schema is
    /// attached to the payload and the first assistant text is parsed.
    pub output_schema: Option<OutputSchema>,
    pub stream: bool,
    /// Server-side retention flag.
    pub store: bool,
    /// Session id / caller metadata, sent verbatim.
    pub metadata: BTreeMap<String, String>,
}

impl ResponsesRequest {
    pub fn builder(model: impl Into<String>) -> ResponsesRequestBuilder {
        ResponsesRequestBuilder {
            request: ResponsesRequest {
                model: model.into(),
                instructions: None,
                input: Vec::new(),
                max_output_tokens: None,
                max_tool_calls: None,
                temperature: None,
                top_p: None,
                tools: Vec::new(),
                tool_choice: ToolChoice::Auto,
                output_schema: None,
                stream: false,
                store: false,
                metadata: BTreeMap::new(),
            },
        }
    }

    /// Serialize to the Responses API wire body.
    ///
    /// Tools are listed in sorted-by-name order so payloads are stable
    /// across registry iteration order.
    pub fn to_wire(&self) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": self.input,
            "stream": self.stream,
            "store": self.store,
        });

        if let Some(ref instructions) = self.instructions {
            body["instructions"] = Value::String(instructions.clone());
        }
        if let Some(max) = self.max_output_tokens {
            body["max_output_tokens"] = serde_json::json!(max);
        }
        if let Some(max) = self.max_tool_calls {
            body["max_tool_calls"] = serde_json::json!(max);
        }
        if let Some(temp) = self.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(top_p) = self.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }

        if !self.tools.is_empty() {
            let mut tools = self.tools.clone();
            tools.sort_by(|a, b| a.name.cmp(&b.name));
            let wire: Vec<Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                        "strict": t.strict,
                    })
                })
                .collect();
            body["tools"] = Value::Array(wire);
            body["tool_choice"] = self.tool_choice.to_wire();
        }

        if let Some(ref schema) = self.output_schema {
            body["text"] = serde_json::json!({
                "format": {
                    "type": "json_schema",
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": schema.strict,
                }
            });
        }

        if !self.metadata.is_empty() {
            body["metadata"] = serde_json::json!(self.metadata);
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ResponsesRequestBuilder {
    request: ResponsesRequest,
}

impl ResponsesRequestBuilder {
    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.request.instructions = Some(text.into());
        self
    }

    pub fn input(mut self, messages: Vec<Message>) -> Self {
        self.request.input = messages;
        self
    }

    pub fn push_message(mut self, message: Message) -> Self {
        self.request.input.push(message);
        self
    }

    pub fn max_output_tokens(mut self, max: u32) -> Self {
        self.request.max_output_tokens = Some(max);
        self
    }

    pub fn max_tool_calls(mut self, max: u32) -> Self {
        self.request.max_tool_calls = Some(max);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.request.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.request.top_p = Some(top_p);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.request.tools = tools;
        self
    }

    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        self.request.tool_choice = choice;
        self
    }

    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.request.output_schema = Some(schema);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.request.stream = stream;
        self
    }

    pub fn store(mut self, store: bool) -> Self {
        self.request.store = store;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<ResponsesRequest> {
        let req = self.request;
        if req.model.trim().is_empty() {
            return Err(Error::Configuration("model is required".into()));
        }
        if let Some(t) = req.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::Configuration(format!(
                    "temperature must be within [0, 2], got {t}"
                )));
            }
        }
        if let Some(p) = req.top_p {
            if !(p > 0.0 && p <= 1.0) {
                return Err(Error::Configuration(format!(
                    "top_p must be within (0, 1], got {p}"
                )));
            }
        }
        for msg in &req.input {
            msg.validate()?;
        }
        if let Some(ref named) = named_choice(&req.tool_choice) {
            if !req.tools.iter().any(|t| &t.name == *named) {
                return Err(Error::Configuration(format!(
                    "tool_choice names unknown tool '{named}'"
                )));
            }
        }
        Ok(req)
    }
}

fn named_choice(choice: &ToolChoice) -> Option<&String> {
    match choice {
        ToolChoice::Named(name) => Some(name),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
