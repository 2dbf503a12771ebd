use serde::{Deserialize, Serialize};

use super::ConfigIssue;

/// Agent runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum LLM round trips per agent run.
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,
    /// Route multi-call assistant turns through parallel execution.
    #[serde(default)]
    pub parallel_tool_calls: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_turns: d_max_turns(),
            parallel_tool_calls: false,
        }
    }
}

impl RuntimeConfig {
    pub(super) fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        if self.max_turns == 0 {
            issues.push(ConfigIssue::error("runtime.max_turns", "must be at least 1"));
        }
    }
}

fn d_max_turns() -> u32 {
    10
}
