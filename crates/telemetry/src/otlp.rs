//! OTLP/JSON span export.
//!
//! Events are converted to OTLP spans, batched up to `batch_size` or
//! `flush_interval`, serialized as an `ExportRequest`, and POSTed to
//! `{endpoint}/v1/traces` with basic (`base64(public:secret)`,
//! Langfuse-style) or bearer auth. HTTP failures are logged and never
//! reach emitters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use casc_domain::config::TelemetryConfig;
use casc_domain::error::{Error, Result};
use casc_domain::event::TelemetryEvent;

use crate::bus::EventProcessor;
use crate::span::event_to_span;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Processor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Batching OTLP exporter. `process` enqueues and returns immediately;
/// a worker task owns buffering and HTTP.
pub struct OtlpProcessor {
    sender: Mutex<Option<mpsc::Sender<TelemetryEvent>>>,
    running: AtomicBool,
}

impl OtlpProcessor {
    /// Validate the config, spawn the export worker, and return the
    /// registrable processor.
    pub fn spawn(config: TelemetryConfig) -> Result<Arc<Self>> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Configuration("telemetry endpoint is required".into()))?;
        let auth_header = auth_header(&config)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;

        let (tx, rx) = mpsc::channel::<TelemetryEvent>(1024);
        let worker = ExportWorker {
            url: format!("{}/v1/traces", endpoint.trim_end_matches('/')),
            auth_header,
            client,
            service_name: config.service_name.clone(),
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(100)),
        };
        tokio::spawn(worker.run(rx));

        Ok(Arc::new(Self {
            sender: Mutex::new(Some(tx)),
            running: AtomicBool::new(true),
        }))
    }
}

impl EventProcessor for OtlpProcessor {
    fn name(&self) -> &str {
        "otlp"
    }

    fn process(&self, event: &TelemetryEvent) -> Result<()> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Ok(()); // shut down; at-most-once means zero is fine
        };
        // Never block the emitter: a full buffer drops the event.
        if let Err(e) = tx.try_send(event.clone()) {
            tracing::warn!(error = %e, "otlp buffer full; span dropped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        // Dropping the sender closes the channel; the worker flushes
        // its remaining batch and exits.
        self.sender.lock().take();
    }
}

fn auth_header(config: &TelemetryConfig) -> Result<String> {
    if let (Some(public), Some(secret)) = (&config.public_key, &config.secret_key) {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{public}:{secret}"));
        return Ok(format!("Basic {encoded}"));
    }
    if let Some(token) = &config.bearer_token {
        return Ok(format!("Bearer {token}"));
    }
    Err(Error::Configuration(
        "telemetry requires public_key+secret_key or bearer_token".into(),
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Export worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ExportWorker {
    url: String,
    auth_header: String,
    client: reqwest::Client,
    service_name: String,
    batch_size: usize,
    flush_interval: Duration,
}

impl ExportWorker {
    async fn run(self, mut rx: mpsc::Receiver<TelemetryEvent>) {
        let mut buffer: Vec<TelemetryEvent> = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(event) => {
                        buffer.push(event);
                        if buffer.len() >= self.batch_size {
                            self.export(&mut buffer).await;
                        }
                    }
                    None => {
                        // Channel closed: final flush, then exit.
                        self.export(&mut buffer).await;
                        return;
                    }
                },
                _ = ticker.tick() => {
                    self.export(&mut buffer).await;
                }
            }
        }
    }

    async fn export(&self, buffer: &mut Vec<TelemetryEvent>) {
        if buffer.is_empty() {
            return;
        }
        let spans: Vec<Value> = buffer.drain(..).map(|e| event_to_span(&e)).collect();
        let body = export_request(&self.service_name, spans);

        let result = self
            .client
            .post(&self.url)
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        // Failures never propagate; the next batch is unaffected.
        match result {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(
                    status = response.status().as_u16(),
                    url = %self.url,
                    "otlp export rejected"
                );
            }
            Ok(_) => {
                tracing::debug!(url = %self.url, "otlp batch exported");
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %self.url, "otlp export failed");
            }
        }
    }
}

/// Assemble the OTLP/JSON `ExportRequest` envelope.
pub fn export_request(service_name: &str, spans: Vec<Value>) -> Value {
    serde_json::json!({
        "resourceSpans": [{
            "resource": {
                "attributes": [{
                    "key": "service.name",
                    "value": {"stringValue": service_name}
                }]
            },
            "scopeSpans": [{
                "scope": {"name": "cascade"},
                "spans": spans
            }]
        }]
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_is_base64_of_key_pair() {
        let config = TelemetryConfig {
            endpoint: Some("https://collector".into()),
            public_key: Some("pk".into()),
            secret_key: Some("sk".into()),
            ..Default::default()
        };
        let header = auth_header(&config).unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode("pk:sk");
        assert_eq!(header, format!("Basic {encoded}"));
    }

    #[test]
    fn bearer_auth_fallback() {
        let config = TelemetryConfig {
            endpoint: Some("https://collector".into()),
            bearer_token: Some("tok".into()),
            ..Default::default()
        };
        assert_eq!(auth_header(&config).unwrap(), "Bearer tok");
    }

    #[test]
    fn missing_credentials_is_an_error() {
        let config = TelemetryConfig {
            endpoint: Some("https://collector".into()),
            ..Default::default()
        };
        assert!(auth_header(&config).is_err());
    }

    #[test]
    fn export_request_envelope_shape() {
        let body = export_request("svc", vec![serde_json::json!({"name": "x"})]);
        let resource = &body["resourceSpans"][0];
        assert_eq!(
            resource["resource"]["attributes"][0]["value"]["stringValue"],
            "svc"
        );
        assert_eq!(resource["scopeSpans"][0]["spans"][0]["name"], "x");
        assert_eq!(resource["scopeSpans"][0]["scope"]["name"], "cascade");
    }

    #[tokio::test]
    async fn spawn_requires_endpoint() {
        assert!(OtlpProcessor::spawn(TelemetryConfig::default()).is_err());
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let config = TelemetryConfig {
            endpoint: Some("http://127.0.0.1:9".into()),
            bearer_token: Some("t".into()),
            ..Default::default()
        };
        let processor = OtlpProcessor::spawn(config).unwrap();
        assert!(processor.is_running());
        processor.shutdown();
        assert!(!processor.is_running());
    }
}
