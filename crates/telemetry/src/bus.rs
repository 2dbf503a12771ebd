//! The telemetry event bus: typed events fan out to every registered
//! processor without blocking the emitter.
//!
//! The processor list is copy-on-write: emitters grab a snapshot, so
//! registration never stalls the hot path. Processor failures are
//! swallowed and logged; delivery is at-most-once per processor per
//! event.

use std::sync::Arc;

use parking_lot::RwLock;

use casc_domain::error::Result;
use casc_domain::event::{EventSink, TelemetryEvent};

/// A telemetry event consumer.
///
/// `process` must be cheap and non-blocking; heavy processors buffer
/// internally and do their work on their own task.
pub trait EventProcessor: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn process(&self, event: &TelemetryEvent) -> Result<()>;
    fn is_running(&self) -> bool;
    fn shutdown(&self);
}

/// Fan-out bus over a copy-on-write processor list.
#[derive(Default)]
pub struct TelemetryBus {
    processors: RwLock<Arc<Vec<Arc<dyn EventProcessor>>>>,
}

impl TelemetryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor. Emitters pick up the new list on their
    /// next emit.
    pub fn register(&self, processor: Arc<dyn EventProcessor>) {
        let mut list = self.processors.write();
        let mut next: Vec<Arc<dyn EventProcessor>> = list.as_ref().clone();
        next.push(processor);
        *list = Arc::new(next);
    }

    /// Dispatch an event to every running processor.
    pub fn emit(&self, event: TelemetryEvent) {
        let snapshot = self.processors.read().clone();
        for processor in snapshot.iter() {
            if !processor.is_running() {
                continue;
            }
            if let Err(e) = processor.process(&event) {
                tracing::warn!(
                    processor = processor.name(),
                    error = %e,
                    "telemetry processor failed; event dropped for this processor"
                );
            }
        }
    }

    /// Shut down every processor.
    pub fn shutdown(&self) {
        let snapshot = self.processors.read().clone();
        for processor in snapshot.iter() {
            processor.shutdown();
        }
    }

    pub fn processor_count(&self) -> usize {
        self.processors.read().len()
    }
}

impl EventSink for TelemetryBus {
    fn emit(&self, event: TelemetryEvent) {
        TelemetryBus::emit(self, event);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log processor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Writes every event to the tracing log as structured JSON. Useful
/// in development and as the always-on fallback processor.
#[derive(Default)]
pub struct LogProcessor;

impl EventProcessor for LogProcessor {
    fn name(&self) -> &str {
        "log"
    }

    fn process(&self, event: &TelemetryEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        tracing::info!(telemetry_event = %json, "cascade_event");
        Ok(())
    }

    fn is_running(&self) -> bool {
        true
    }

    fn shutdown(&self) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
