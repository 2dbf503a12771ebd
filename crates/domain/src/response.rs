use serde::{Deserialize, Serialize};

use crate::message::{Content, Message, Role};
use crate::tool::ToolCall;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status & usage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Token usage for one response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,
}

impl Usage {
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(cached) = other.cached_tokens {
            *self.cached_tokens.get_or_insert(0) += cached;
        }
    }
}

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Dollars per 1 million input tokens.
    pub input_per_1m: f64,
    /// Dollars per 1 million output tokens.
    pub output_per_1m: f64,
}

impl ModelPricing {
    /// Estimated cost in USD for the given usage.
    pub fn estimate_cost(&self, usage: &Usage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_1m
            + usage.output_tokens as f64 * self.output_per_1m)
            / 1_000_000.0
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output items
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One item in a response's `output` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message(Message),
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully-parsed `/responses` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub id: String,
    pub status: ResponseStatus,
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub usage: Usage,
    pub model: String,
    #[serde(default)]
    pub created_at: i64,
    /// Estimated cost in USD, when pricing is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl ModelResponse {
    /// All assistant text in output order, joined with `"\n"`.
    pub fn output_text(&self) -> String {
        let parts: Vec<String> = self
            .output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Message(msg) if msg.role == Role::Assistant => {
                    let text = msg.all_text();
                    (!text.is_empty()).then_some(text)
                }
                _ => None,
            })
            .collect();
        parts.join("\n")
    }

    /// Tool calls requested by the model, in output order.
    ///
    /// Collects both top-level `function_call` items and tool-call
    /// content embedded in assistant messages.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        let mut calls = Vec::new();
        for item in &self.output {
            match item {
                OutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => calls.push(ToolCall {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                OutputItem::Message(msg) => {
                    for (call_id, name, arguments) in msg.tool_calls() {
                        calls.push(ToolCall {
                            call_id: call_id.into(),
                            name: name.into(),
                            arguments: arguments.into(),
                        });
                    }
                }
                OutputItem::Reasoning { .. } => {}
            }
        }
        calls
    }

    /// First assistant message, if any.
    pub fn first_assistant_message(&self) -> Option<&Message> {
        self.output.iter().find_map(|item| match item {
            OutputItem::Message(msg) if msg.role == Role::Assistant => Some(msg),
            _ => None,
        })
    }

    /// Mutable access to the first assistant message (used to attach
    /// the structured-output `parsed` value after the fact).
    pub fn first_assistant_message_mut(&mut self) -> Option<&mut Message> {
        self.output.iter_mut().find_map(|item| match item {
            OutputItem::Message(msg) if msg.role == Role::Assistant => Some(msg),
            _ => None,
        })
    }

    /// A response is terminal-final when it carries assistant text and
    /// no pending tool calls.
    pub fn is_final_text(&self) -> bool {
        self.tool_calls().is_empty() && !self.output_text().is_empty()
    }
}

/// Convenience constructor used by streaming assembly.
pub fn assistant_output(id: impl Into<String>, text: impl Into<String>) -> OutputItem {
    OutputItem::Message(Message {
        role: Role::Assistant,
        content: vec![Content::text(text)],
        id: Some(id.into()),
        parsed: None,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(output: Vec<OutputItem>) -> ModelResponse {
        ModelResponse {
            id: "resp_1".into(),
            status: ResponseStatus::Completed,
            output,
            usage: Usage::default(),
            model: "m".into(),
            created_at: 0,
            cost_usd: None,
            finish_reason: None,
        }
    }

    #[test]
    fn output_text_joins_assistant_messages() {
        let resp = response_with(vec![
            assistant_output("msg_1", "hello"),
            OutputItem::Reasoning { summary: vec![] },
            assistant_output("msg_2", "world"),
        ]);
        assert_eq!(resp.output_text(), "hello\nworld");
    }

    #[test]
    fn tool_calls_collects_both_shapes() {
        let mut msg = Message::assistant("calling");
        msg.id = Some("msg_1".into());
        msg.content.push(Content::ToolCall {
            call_id: "c2".into(),
            name: "embedded".into(),
            arguments: "{}".into(),
        });
        let resp = response_with(vec![
            OutputItem::FunctionCall {
                call_id: "c1".into(),
                name: "top_level".into(),
                arguments: r#"{"x":1}"#.into(),
            },
            OutputItem::Message(msg),
        ]);
        let calls = resp.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "top_level");
        assert_eq!(calls[1].name, "embedded");
    }

    #[test]
    fn final_text_requires_no_pending_calls() {
        let final_resp = response_with(vec![assistant_output("m", "done")]);
        assert!(final_resp.is_final_text());

        let tool_resp = response_with(vec![OutputItem::FunctionCall {
            call_id: "c1".into(),
            name: "t".into(),
            arguments: "{}".into(),
        }]);
        assert!(!tool_resp.is_final_text());
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.accumulate(&Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            cached_tokens: Some(2),
        });
        total.accumulate(&Usage {
            input_tokens: 1,
            output_tokens: 1,
            total_tokens: 2,
            cached_tokens: None,
        });
        assert_eq!(total.total_tokens, 17);
        assert_eq!(total.cached_tokens, Some(2));
    }

    #[test]
    fn pricing_estimates_cost() {
        let pricing = ModelPricing {
            input_per_1m: 2.0,
            output_per_1m: 8.0,
        };
        let usage = Usage {
            input_tokens: 1_000_000,
            output_tokens: 500_000,
            total_tokens: 1_500_000,
            cached_tokens: None,
        };
        assert!((pricing.estimate_cost(&usage) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn status_wire_format() {
        assert_eq!(
            serde_json::to_string(&ResponseStatus::InProgress).unwrap(),
            r#""in_progress""#
        );
    }
}
