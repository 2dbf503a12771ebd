use serde::{Deserialize, Serialize};

use super::ConfigIssue;

/// OTLP/JSON span export configuration.
///
/// When `endpoint` is `None` (the default), no exporter is started and
/// events only reach in-process processors. Auth is either basic
/// (`public_key` + `secret_key`, Langfuse-style) or a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Collector base URL (e.g. `https://cloud.langfuse.com/api/public/otel`).
    /// Spans are POSTed to `{endpoint}/v1/traces`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Spans buffered before a forced export.
    #[serde(default = "d_batch_size")]
    pub batch_size: usize,
    #[serde(default = "d_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// The `service.name` resource attribute.
    #[serde(default = "d_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            public_key: None,
            secret_key: None,
            bearer_token: None,
            batch_size: d_batch_size(),
            flush_interval_ms: d_flush_interval_ms(),
            service_name: d_service_name(),
        }
    }
}

impl TelemetryConfig {
    pub(super) fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        if self.endpoint.is_some() {
            let has_basic = self.public_key.is_some() && self.secret_key.is_some();
            let has_bearer = self.bearer_token.is_some();
            if !has_basic && !has_bearer {
                issues.push(ConfigIssue::error(
                    "telemetry",
                    "endpoint configured without credentials: set public_key+secret_key or bearer_token",
                ));
            }
        }
        if self.batch_size == 0 {
            issues.push(ConfigIssue::error("telemetry.batch_size", "must be at least 1"));
        }
    }
}

fn d_batch_size() -> usize {
    32
}

fn d_flush_interval_ms() -> u64 {
    5_000
}

fn d_service_name() -> String {
    "cascade".into()
}
