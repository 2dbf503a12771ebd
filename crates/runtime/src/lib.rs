//! Agent runtime: tool registry, guardrails, declarative tool plans,
//! and the multi-turn agent loop with handoffs and cancellation.

pub mod agent;
pub mod guardrails;
pub mod plan;
pub mod registry;
pub mod turn;

pub use agent::{Agent, AgentBuilder, AgentId, AgentPool, ContextTransfer, Handoff};
pub use guardrails::{guardrail, run_guardrails, Guardrail, GuardrailVerdict};
pub use plan::{
    plan_tool, PlanExecutor, PlanOutcome, PlanStep, StepResult, ToolPlan, PLAN_TOOL_NAME,
};
pub use registry::{Tool, ToolRegistry, WeakRegistry};
pub use turn::{AgentEvent, AgentResult, AgentRuntime, RunContext, RunStatus};
