use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ConfigIssue, ConfigSeverity};
use crate::response::ModelPricing;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responder / HTTP transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Bearer key for the model API. Empty means "fill in at runtime".
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Per-call total timeout.
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-model pricing for cost estimation (key = model name).
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: d_base_url(),
            timeout_ms: d_timeout_ms(),
            retry: RetryConfig::default(),
            pricing: HashMap::new(),
        }
    }
}

impl ResponderConfig {
    pub(super) fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        if self.api_key.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "responder.api_key".into(),
                message: "no API key configured; requests will be rejected upstream".into(),
            });
        }
        if self.base_url.trim().is_empty() {
            issues.push(ConfigIssue::error("responder.base_url", "must not be empty"));
        }
        if self.timeout_ms == 0 {
            issues.push(ConfigIssue::error("responder.timeout_ms", "must be positive"));
        }
        self.retry.validate(issues);
    }
}

fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn d_timeout_ms() -> u64 {
    120_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = max_retries + 1).
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    #[serde(default = "d_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Exponential growth factor between attempts.
    #[serde(default = "d_factor")]
    pub factor: f64,
    /// Jitter amplitude as a fraction of the computed delay (0.2 = ±20%).
    #[serde(default = "d_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: d_max_retries(),
            base_delay_ms: d_base_delay_ms(),
            factor: d_factor(),
            jitter: d_jitter(),
        }
    }
}

impl RetryConfig {
    pub(super) fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        if self.factor < 1.0 {
            issues.push(ConfigIssue::error(
                "responder.retry.factor",
                "must be >= 1.0",
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            issues.push(ConfigIssue::error(
                "responder.retry.jitter",
                "must be within [0, 1)",
            ));
        }
    }
}

fn d_max_retries() -> u32 {
    2
}

fn d_base_delay_ms() -> u64 {
    500
}

fn d_factor() -> f64 {
    2.0
}

fn d_jitter() -> f64 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_defaults_match_policy() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.base_delay_ms, 500);
        assert!((cfg.factor - 2.0).abs() < f64::EPSILON);
        assert!((cfg.jitter - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn bad_retry_config_flagged() {
        let cfg = RetryConfig {
            factor: 0.5,
            jitter: 1.5,
            ..Default::default()
        };
        let mut issues = Vec::new();
        cfg.validate(&mut issues);
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn deserialize_partial() {
        let cfg: ResponderConfig = toml::from_str(
            r#"
            api_key = "sk-test"
            [retry]
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.api_key, "sk-test");
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.base_delay_ms, 500);
    }
}
