//! Prompt templates: `{{var}}`, `{{#if cond}}…{{/if}}`,
//! `{{#each list}}…{{/each}}`.
//!
//! Variables use dotted paths into a JSON context. Block constructs are
//! parsed with a small recursive parser so nesting works; plain
//! variables are simple text splices. Compiling a compiled prompt is a
//! no-op, which makes compilation idempotent.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Root-key → value mapping used to resolve template variables.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    values: HashMap<String, Value>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Resolve a dotted path (`user.name`). The first segment selects a
    /// root key; the rest walk object fields and array indices.
    fn lookup(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;
        let mut current = self.values.get(root)?.clone();
        for seg in segments {
            current = walk(&current, seg)?;
        }
        Some(current)
    }
}

fn walk(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(segment).cloned(),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        _ => None,
    }
}

/// Render a JSON value as template output text.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Truthiness for `{{#if}}`: false, null, "", 0, [], {} are falsy.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An immutable prompt template. `compiled` distinguishes resolved text
/// from template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    text: String,
    compiled: bool,
}

impl Prompt {
    pub fn template(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            compiled: false,
        }
    }

    /// A prompt with no placeholders left to resolve.
    pub fn compiled(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            compiled: true,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Resolve the template against a context. Compiling an
    /// already-compiled prompt returns it unchanged.
    pub fn compile(&self, ctx: &PromptContext) -> Result<Prompt> {
        if self.compiled {
            return Ok(self.clone());
        }
        let rendered = render(&self.text, ctx)?;
        Ok(Prompt::compiled(rendered))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
enum Node {
    Text(String),
    Variable(String),
    If { cond: String, body: Vec<Node> },
    Each { list: String, body: Vec<Node> },
}

/// Parse a template into nodes. Stops at `{{/...}}` when `closing` is
/// set (used while recursing into a block body).
fn parse_nodes<'a>(
    mut rest: &'a str,
    closing: Option<&str>,
) -> Result<(Vec<Node>, &'a str)> {
    let mut nodes = Vec::new();

    loop {
        match rest.find("{{") {
            None => {
                if let Some(tag) = closing {
                    return Err(Error::Configuration(format!(
                        "unclosed block: missing {{{{/{tag}}}}}"
                    )));
                }
                if !rest.is_empty() {
                    nodes.push(Node::Text(rest.to_string()));
                }
                return Ok((nodes, ""));
            }
            Some(start) => {
                if start > 0 {
                    nodes.push(Node::Text(rest[..start].to_string()));
                }
                let after_open = &rest[start + 2..];
                let end = after_open.find("}}").ok_or_else(|| {
                    Error::Configuration("unterminated '{{' in template".into())
                })?;
                let tag = after_open[..end].trim();
                let after_tag = &after_open[end + 2..];

                if let Some(close_tag) = tag.strip_prefix('/') {
                    match closing {
                        Some(expected) if expected == close_tag.trim() => {
                            return Ok((nodes, after_tag));
                        }
                        _ => {
                            return Err(Error::Configuration(format!(
                                "unexpected closing tag {{{{/{close_tag}}}}}"
                            )));
                        }
                    }
                } else if let Some(cond) = tag.strip_prefix("#if ") {
                    let cond = cond.trim().to_string();
                    let (body, remaining) = parse_nodes(after_tag, Some("if"))?;
                    nodes.push(Node::If { cond, body });
                    rest = remaining;
                } else if let Some(list) = tag.strip_prefix("#each ") {
                    let list = list.trim().to_string();
                    let (body, remaining) = parse_nodes(after_tag, Some("each"))?;
                    nodes.push(Node::Each { list, body });
                    rest = remaining;
                } else {
                    nodes.push(Node::Variable(tag.to_string()));
                    rest = after_tag;
                }
            }
        }
    }
}

fn render(template: &str, ctx: &PromptContext) -> Result<String> {
    let (nodes, _) = parse_nodes(template, None)?;
    let mut out = String::with_capacity(template.len());
    render_nodes(&nodes, ctx, &mut out);
    Ok(out)
}

fn render_nodes(nodes: &[Node], ctx: &PromptContext, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Variable(path) => {
                if let Some(value) = ctx.lookup(path) {
                    out.push_str(&render_value(&value));
                }
                // Unknown variables render empty.
            }
            Node::If { cond, body } => {
                let pass = ctx.lookup(cond).map(|v| truthy(&v)).unwrap_or(false);
                if pass {
                    render_nodes(body, ctx, out);
                }
            }
            Node::Each { list, body } => {
                let Some(Value::Array(items)) = ctx.lookup(list) else {
                    continue;
                };
                for item in items {
                    let scoped = scope_for_item(ctx, &item);
                    render_nodes(body, &scoped, out);
                }
            }
        }
    }
}

/// Inside `{{#each}}`, `this` names the current element and its fields
/// are also reachable directly (`{{name}}` for object elements).
fn scope_for_item(parent: &PromptContext, item: &Value) -> PromptContext {
    let mut scoped = parent.clone();
    scoped.values.insert("this".into(), item.clone());
    if let Value::Object(map) = item {
        for (k, v) in map {
            scoped.values.insert(k.clone(), v.clone());
        }
    }
    scoped
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
