//! Inbound message validation: length cap and blocked patterns.

use regex::Regex;

use casc_domain::config::SecurityConfig;
use casc_domain::error::{Error, Result};

/// Why a message was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Empty,
    TooLong { length: usize, max: usize },
    BlockedPattern { pattern: String },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::Empty => f.write_str("message is empty"),
            Violation::TooLong { length, max } => {
                write!(f, "message length {length} exceeds limit {max}")
            }
            Violation::BlockedPattern { pattern } => {
                write!(f, "message matches blocked pattern '{pattern}'")
            }
        }
    }
}

/// Validates inbound messages against the security config. Patterns
/// are compiled once at construction.
pub struct MessageValidator {
    max_length: usize,
    blocked: Vec<Regex>,
}

impl MessageValidator {
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let mut blocked = Vec::with_capacity(config.blocked_patterns.len());
        for pattern in &config.blocked_patterns {
            let compiled = Regex::new(pattern).map_err(|e| {
                Error::Configuration(format!("invalid blocked pattern '{pattern}': {e}"))
            })?;
            blocked.push(compiled);
        }
        Ok(Self {
            max_length: config.max_message_length,
            blocked,
        })
    }

    /// Check one message. `Ok(())` means deliverable.
    pub fn validate(&self, text: &str) -> std::result::Result<(), Violation> {
        if text.trim().is_empty() {
            return Err(Violation::Empty);
        }
        let length = text.chars().count();
        if length > self.max_length {
            return Err(Violation::TooLong {
                length,
                max: self.max_length,
            });
        }
        for regex in &self.blocked {
            if regex.is_match(text) {
                tracing::debug!(pattern = %regex.as_str(), "message blocked by pattern");
                return Err(Violation::BlockedPattern {
                    pattern: regex.as_str().to_string(),
                });
            }
        }
        Ok(())
    }
}
