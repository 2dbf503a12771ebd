use serde::{Deserialize, Serialize};

use super::ConfigIssue;

/// Inbound-channel security settings: webhook signature verification,
/// message validation, and flood control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Token echoed back during webhook subscription handshakes.
    #[serde(default)]
    pub webhook_verify_token: String,
    /// Shared secret for HMAC-SHA256 payload signatures.
    #[serde(default)]
    pub app_secret: Option<String>,
    /// When false, signature checks are skipped (dev only).
    #[serde(default = "d_true")]
    pub validate_signatures: bool,
    #[serde(default = "d_max_message_length")]
    pub max_message_length: usize,
    /// Regex patterns; messages matching any of them are rejected.
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    #[serde(default = "d_flood_window_ms")]
    pub flood_window_ms: u64,
    #[serde(default = "d_flood_max_messages")]
    pub flood_max_messages: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            webhook_verify_token: String::new(),
            app_secret: None,
            validate_signatures: d_true(),
            max_message_length: d_max_message_length(),
            blocked_patterns: Vec::new(),
            flood_window_ms: d_flood_window_ms(),
            flood_max_messages: d_flood_max_messages(),
        }
    }
}

impl SecurityConfig {
    pub(super) fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        if self.validate_signatures && self.app_secret.is_none() {
            issues.push(ConfigIssue::warning(
                "security.app_secret",
                "signature validation enabled but no app_secret configured",
            ));
        }
        for pattern in &self.blocked_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                issues.push(ConfigIssue::error(
                    "security.blocked_patterns",
                    format!("invalid regex '{pattern}': {e}"),
                ));
            }
        }
        if self.flood_max_messages == 0 {
            issues.push(ConfigIssue::error(
                "security.flood_max_messages",
                "must be at least 1",
            ));
        }
    }
}

fn d_true() -> bool {
    true
}

fn d_max_message_length() -> usize {
    4_096
}

fn d_flood_window_ms() -> u64 {
    10_000
}

fn d_flood_max_messages() -> usize {
    10
}
