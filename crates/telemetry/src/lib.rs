//! Telemetry: the event bus, the OTLP/JSON span exporter, and tracing
//! subscriber setup.

pub mod bus;
pub mod otlp;
pub mod span;

pub use bus::{EventProcessor, LogProcessor, TelemetryBus};
pub use otlp::{export_request, OtlpProcessor};
pub use span::event_to_span;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
