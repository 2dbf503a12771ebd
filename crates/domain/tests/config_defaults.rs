//! Full-surface config parsing: a realistic TOML document exercising
//! every subsystem section.

use casc_domain::config::{
    BackpressurePolicy, CascadeConfig, ConfigSeverity, ErrorStrategy,
};

#[test]
fn full_document_parses() {
    let cfg = CascadeConfig::from_toml_str(
        r#"
        [responder]
        api_key = "sk-live"
        base_url = "https://api.openai.com/v1"
        timeout_ms = 60000

        [responder.retry]
        max_retries = 3
        base_delay_ms = 250
        factor = 1.5
        jitter = 0.1

        [responder.pricing.gpt-x]
        input_per_1m = 2.5
        output_per_1m = 10.0

        [runtime]
        max_turns = 6
        parallel_tool_calls = true

        [batching]
        max_batch_size = 5
        max_wait_ms = 15000
        silence_threshold_ms = 2000
        max_concurrent_users = 8
        error_strategy = "dead_letter"
        backpressure = "drop_oldest"

        [security]
        webhook_verify_token = "verify-me"
        app_secret = "hmac-secret"
        max_message_length = 2048
        blocked_patterns = ["(?i)spam"]
        flood_window_ms = 1000
        flood_max_messages = 3

        [telemetry]
        endpoint = "https://cloud.langfuse.com/api/public/otel"
        public_key = "pk-lf"
        secret_key = "sk-lf"
        batch_size = 16
        flush_interval_ms = 2000
        service_name = "my-agent"
        "#,
    )
    .unwrap();

    assert_eq!(cfg.responder.retry.max_retries, 3);
    assert!(cfg.responder.pricing.contains_key("gpt-x"));
    assert_eq!(cfg.runtime.max_turns, 6);
    assert!(cfg.runtime.parallel_tool_calls);
    assert_eq!(cfg.batching.error_strategy, ErrorStrategy::DeadLetter);
    assert_eq!(cfg.batching.backpressure, BackpressurePolicy::DropOldest);
    assert_eq!(cfg.security.flood_max_messages, 3);
    assert_eq!(cfg.telemetry.service_name, "my-agent");

    let issues = cfg.validate();
    assert!(
        issues.iter().all(|i| i.severity != ConfigSeverity::Error),
        "unexpected errors: {issues:?}"
    );
}

#[test]
fn defaults_survive_sparse_documents() {
    let cfg = CascadeConfig::from_toml_str("[responder]\napi_key = \"k\"\n").unwrap();
    assert_eq!(cfg.responder.timeout_ms, 120_000);
    assert_eq!(cfg.batching.max_wait_ms, 30_000);
    assert_eq!(cfg.security.max_message_length, 4_096);
    assert!(cfg.telemetry.endpoint.is_none());
}
