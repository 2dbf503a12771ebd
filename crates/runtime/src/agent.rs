//! Agents, the agent pool, and handoff declarations.
//!
//! Handoff targets are indices into the pool rather than direct
//! references, so mutual handoffs (A ⇄ B) need no reference cycles.

use std::sync::Arc;

use serde_json::Value;

use casc_domain::error::{Error, Result};
use casc_domain::schema::OutputSchema;
use casc_domain::tool::ToolSpec;

use crate::guardrails::Guardrail;
use crate::registry::ToolRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handoffs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Index of an agent inside an [`AgentPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentId(pub usize);

/// What the target agent inherits from the current conversation.
/// Each handoff tool declares its own transfer contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextTransfer {
    /// The target sees the full message history.
    #[default]
    FullConversation,
    /// The target sees only the most recent user message.
    LastUserMessage,
}

/// A handoff declaration: a tool the model can call to delegate the
/// rest of the conversation to another agent.
#[derive(Debug, Clone)]
pub struct Handoff {
    pub tool_name: String,
    pub target: AgentId,
    pub description: String,
    pub transfer: ContextTransfer,
}

impl Handoff {
    /// Standard handoff tool: `handoff_to_<target-name>`.
    pub fn to(target: AgentId, target_name: &str) -> Self {
        let slug = slugify(target_name);
        Self {
            tool_name: format!("handoff_to_{slug}"),
            target,
            description: format!("Delegate the conversation to the {target_name} agent."),
            transfer: ContextTransfer::default(),
        }
    }

    pub fn with_transfer(mut self, transfer: ContextTransfer) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Wire spec exposed to the model for this handoff.
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.tool_name.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Why the conversation is being handed off."
                    }
                }
            }),
            strict: false,
        }
    }
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One configured agent. Owns its tool registry handle, guardrail
/// lists, and handoff declarations.
pub struct Agent {
    pub name: String,
    pub instructions: String,
    pub model: String,
    /// Text fragments appended to the instructions.
    pub skills: Vec<String>,
    pub registry: ToolRegistry,
    pub input_guardrails: Vec<Arc<dyn Guardrail>>,
    pub output_guardrails: Vec<Arc<dyn Guardrail>>,
    pub handoffs: Vec<Handoff>,
    pub max_turns: u32,
    pub output_schema: Option<OutputSchema>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub parallel_tool_calls: bool,
}

impl Agent {
    pub fn builder(name: impl Into<String>, model: impl Into<String>) -> AgentBuilder {
        AgentBuilder {
            agent: Agent {
                name: name.into(),
                instructions: String::new(),
                model: model.into(),
                skills: Vec::new(),
                registry: ToolRegistry::new(),
                input_guardrails: Vec::new(),
                output_guardrails: Vec::new(),
                handoffs: Vec::new(),
                max_turns: 10,
                output_schema: None,
                temperature: None,
                top_p: None,
                max_output_tokens: None,
                parallel_tool_calls: false,
            },
        }
    }

    /// Instructions plus skill fragments, as sent to the model.
    pub fn effective_instructions(&self) -> String {
        if self.skills.is_empty() {
            return self.instructions.clone();
        }
        let mut out = self.instructions.clone();
        for skill in &self.skills {
            out.push_str("\n\n");
            out.push_str(skill);
        }
        out
    }

    /// Registry tools plus handoff tools, for the request payload.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        let mut specs = self.registry.definitions();
        specs.extend(self.handoffs.iter().map(Handoff::spec));
        specs
    }

    pub fn find_handoff(&self, tool_name: &str) -> Option<&Handoff> {
        self.handoffs.iter().find(|h| h.tool_name == tool_name)
    }
}

pub struct AgentBuilder {
    agent: Agent,
}

impl AgentBuilder {
    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.agent.instructions = text.into();
        self
    }

    pub fn skill(mut self, fragment: impl Into<String>) -> Self {
        self.agent.skills.push(fragment.into());
        self
    }

    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.agent.registry = registry;
        self
    }

    pub fn input_guardrail(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.agent.input_guardrails.push(guardrail);
        self
    }

    pub fn output_guardrail(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.agent.output_guardrails.push(guardrail);
        self
    }

    pub fn handoff(mut self, handoff: Handoff) -> Self {
        self.agent.handoffs.push(handoff);
        self
    }

    pub fn max_turns(mut self, max_turns: u32) -> Self {
        self.agent.max_turns = max_turns;
        self
    }

    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.agent.output_schema = Some(schema);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.agent.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.agent.top_p = Some(top_p);
        self
    }

    pub fn max_output_tokens(mut self, max: u32) -> Self {
        self.agent.max_output_tokens = Some(max);
        self
    }

    pub fn parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.agent.parallel_tool_calls = parallel;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let agent = self.agent;
        if agent.name.trim().is_empty() {
            return Err(Error::Configuration("agent name must not be empty".into()));
        }
        if agent.model.trim().is_empty() {
            return Err(Error::Configuration("agent model must not be empty".into()));
        }
        if agent.max_turns == 0 {
            return Err(Error::Configuration("max_turns must be at least 1".into()));
        }
        Ok(agent)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Table of agents. Handoffs refer to entries by [`AgentId`], which
/// permits handoff cycles between agents without shared ownership.
#[derive(Default)]
pub struct AgentPool {
    agents: Vec<Agent>,
}

impl AgentPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, agent: Agent) -> AgentId {
        self.agents.push(agent);
        AgentId(self.agents.len() - 1)
    }

    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id.0)
    }

    /// Mutable access, used to wire handoffs after both agents exist.
    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Extract the handoff context from a handoff tool call's arguments.
/// Empty or `{}` arguments mean "no extra context".
pub(crate) fn handoff_context(arguments: &str) -> Option<String> {
    let value: Value = serde_json::from_str(arguments).ok()?;
    let obj = value.as_object()?;
    if obj.is_empty() {
        return None;
    }
    Some(value.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_validates() {
        assert!(Agent::builder("", "m").build().is_err());
        assert!(Agent::builder("a", " ").build().is_err());
        assert!(Agent::builder("a", "m").max_turns(0).build().is_err());
        let agent = Agent::builder("a", "m").build().unwrap();
        assert_eq!(agent.max_turns, 10);
    }

    #[test]
    fn skills_append_to_instructions() {
        let agent = Agent::builder("a", "m")
            .instructions("Base.")
            .skill("Skill one.")
            .skill("Skill two.")
            .build()
            .unwrap();
        assert_eq!(agent.effective_instructions(), "Base.\n\nSkill one.\n\nSkill two.");
    }

    #[test]
    fn handoff_tool_name_is_slugged() {
        let handoff = Handoff::to(AgentId(1), "Billing Support");
        assert_eq!(handoff.tool_name, "handoff_to_billing_support");
        assert_eq!(handoff.spec().name, "handoff_to_billing_support");
    }

    #[test]
    fn pool_supports_mutual_handoffs() {
        let mut pool = AgentPool::new();
        let a = pool.add(Agent::builder("a", "m").build().unwrap());
        let b = pool.add(Agent::builder("b", "m").build().unwrap());

        pool.get_mut(a).unwrap().handoffs.push(Handoff::to(b, "b"));
        pool.get_mut(b).unwrap().handoffs.push(Handoff::to(a, "a"));

        assert_eq!(pool.get(a).unwrap().handoffs[0].target, b);
        assert_eq!(pool.get(b).unwrap().handoffs[0].target, a);
    }

    #[test]
    fn tool_specs_include_handoffs() {
        let registry = ToolRegistry::new();
        registry
            .register(crate::registry::Tool::new(
                "lookup",
                "d",
                serde_json::json!({"type": "object", "properties": {}}),
                |_| async { Ok(String::new()) },
            ))
            .unwrap();
        let agent = Agent::builder("a", "m")
            .registry(registry)
            .handoff(Handoff::to(AgentId(2), "escalation"))
            .build()
            .unwrap();
        let names: Vec<String> = agent.tool_specs().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"lookup".to_string()));
        assert!(names.contains(&"handoff_to_escalation".to_string()));
    }

    #[test]
    fn handoff_context_extraction() {
        assert_eq!(handoff_context("{}"), None);
        assert_eq!(handoff_context("not json"), None);
        let ctx = handoff_context(r#"{"reason": "billing question"}"#).unwrap();
        assert!(ctx.contains("billing question"));
    }
}
