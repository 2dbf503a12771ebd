use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Valid tool names: `[A-Za-z0-9_-]{1,64}`.
pub fn validate_tool_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "invalid tool name '{name}': must match [A-Za-z0-9_-]{{1,64}}"
        )))
    }
}

/// Wire-level tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
    /// When true, the schema is enforced strictly by the model
    /// (all properties required, no additional properties).
    #[serde(default)]
    pub strict: bool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    /// Arguments as the literal JSON text the model produced.
    pub arguments: String,
}

impl ToolCall {
    /// Parse the arguments text as JSON. An empty argument string maps
    /// to an empty object (some models omit arguments entirely).
    pub fn arguments_json(&self) -> Result<serde_json::Value> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        Ok(serde_json::from_str(&self.arguments)?)
    }
}

/// The result of executing a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallOutput {
    pub call_id: String,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Tool-choice policy for a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
    /// Force one named tool.
    Named(String),
}

impl ToolChoice {
    /// Serialize to the Responses API wire value.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            ToolChoice::Auto => serde_json::Value::String("auto".into()),
            ToolChoice::Required => serde_json::Value::String("required".into()),
            ToolChoice::None => serde_json::Value::String("none".into()),
            ToolChoice::Named(name) => serde_json::json!({
                "type": "function",
                "name": name,
            }),
        }
    }
}
