//! Tool registry: a catalog of callable local functions with JSON
//! Schema parameter specs.
//!
//! Read-heavy after build. The registry is cheap to clone (shared
//! interior) so the agent and the plan executor see the same catalog.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;

use casc_domain::error::{Error, Result};
use casc_domain::tool::{validate_tool_name, ToolCall, ToolCallOutput, ToolSpec};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type ToolFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;
type ToolHandler = Box<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// A registered tool: wire spec plus the invocation callback.
pub struct Tool {
    spec: ToolSpec,
    handler: ToolHandler,
}

impl Tool {
    /// Build a tool from an async closure.
    ///
    /// ```ignore
    /// let tool = Tool::new("weather", "Current weather", params, |args| async move {
    ///     Ok(format!("sunny in {}", args["city"].as_str().unwrap_or("?")))
    /// });
    /// ```
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            spec: ToolSpec {
                name: name.into(),
                description: description.into(),
                parameters,
                strict: false,
            },
            handler: Box::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn strict(mut self) -> Self {
        self.spec.strict = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("spec", &self.spec).finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared tool catalog. Clones share the same interior.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    inner: Arc<RwLock<BTreeMap<String, Arc<Tool>>>>,
}

/// Non-owning registry handle, used where a tool needs to call back
/// into the registry that owns it without creating a reference cycle.
#[derive(Clone)]
pub struct WeakRegistry {
    inner: Weak<RwLock<BTreeMap<String, Arc<Tool>>>>,
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<ToolRegistry> {
        self.inner.upgrade().map(|inner| ToolRegistry { inner })
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register a tool. Duplicate names are rejected.
    pub fn register(&self, tool: Tool) -> Result<()> {
        validate_tool_name(tool.name())?;
        let mut tools = self.inner.write();
        if tools.contains_key(tool.name()) {
            return Err(Error::Configuration(format!(
                "tool '{}' is already registered",
                tool.name()
            )));
        }
        tools.insert(tool.name().to_string(), Arc::new(tool));
        Ok(())
    }

    /// Remove a tool. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.inner.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.inner.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Wire specs for every tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolSpec> {
        self.inner.read().values().map(|t| t.spec.clone()).collect()
    }

    /// Execute a tool call: look up, check arguments against the
    /// parameter schema, invoke. Any failure from the callback is
    /// wrapped as a tool-execution error. No retry, no timeout.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolCallOutput> {
        let tool = self.get(&call.name).ok_or_else(|| Error::ToolExecution {
            tool_name: call.name.clone(),
            call_id: call.call_id.clone(),
            arguments: call.arguments.clone(),
            message: "tool not found".into(),
        })?;

        let arguments = call.arguments_json().map_err(|e| Error::ToolExecution {
            tool_name: call.name.clone(),
            call_id: call.call_id.clone(),
            arguments: call.arguments.clone(),
            message: format!("arguments are not valid JSON: {e}"),
        })?;
        check_required(&tool.spec.parameters, &arguments).map_err(|msg| {
            Error::ToolExecution {
                tool_name: call.name.clone(),
                call_id: call.call_id.clone(),
                arguments: call.arguments.clone(),
                message: msg,
            }
        })?;

        match (tool.handler)(arguments).await {
            Ok(output) => Ok(ToolCallOutput {
                call_id: call.call_id.clone(),
                output,
                is_error: false,
            }),
            Err(e) => Err(Error::ToolExecution {
                tool_name: call.name.clone(),
                call_id: call.call_id.clone(),
                arguments: call.arguments.clone(),
                message: e.to_string(),
            }),
        }
    }
}

/// Check the arguments object carries every `required` property of the
/// parameter schema.
fn check_required(schema: &Value, arguments: &Value) -> std::result::Result<(), String> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };
    let Some(args) = arguments.as_object() else {
        return Err("arguments must be a JSON object".into());
    };
    for name in required.iter().filter_map(Value::as_str) {
        if !args.contains_key(name) {
            return Err(format!("missing required argument '{name}'"));
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
