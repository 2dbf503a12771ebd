//! Input/output guardrails: validators attached to an agent that can
//! veto a message before the LLM call or a final answer after it.
//!
//! Guardrails are pure with respect to the turn loop: they see text,
//! they return a verdict, they mutate nothing.

use std::sync::Arc;

use casc_domain::error::{Error, GuardrailViolation, Result};

/// Outcome of a single guardrail check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailVerdict {
    Pass,
    Block { reason: String },
}

impl GuardrailVerdict {
    pub fn block(reason: impl Into<String>) -> Self {
        GuardrailVerdict::Block {
            reason: reason.into(),
        }
    }
}

/// A named validator over input or output text.
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, text: &str) -> GuardrailVerdict;
}

/// Build a guardrail from a closure.
pub fn guardrail<F>(name: impl Into<String>, check: F) -> Arc<dyn Guardrail>
where
    F: Fn(&str) -> GuardrailVerdict + Send + Sync + 'static,
{
    Arc::new(FnGuardrail {
        name: name.into(),
        check: Box::new(check),
    })
}

struct FnGuardrail {
    name: String,
    check: Box<dyn Fn(&str) -> GuardrailVerdict + Send + Sync>,
}

impl Guardrail for FnGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, text: &str) -> GuardrailVerdict {
        (self.check)(text)
    }
}

/// Run a guardrail list in order. The first block short-circuits.
pub fn run_guardrails(
    guardrails: &[Arc<dyn Guardrail>],
    violation: GuardrailViolation,
    text: &str,
) -> Result<()> {
    for guard in guardrails {
        if let GuardrailVerdict::Block { reason } = guard.check(text) {
            return Err(Error::Guardrail {
                violation,
                reason,
                guardrail: Some(guard.name().to_string()),
            });
        }
    }
    Ok(())
}
