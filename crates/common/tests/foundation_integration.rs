//! Integration tests for the foundation tier.
//!
//! These tests exercise the public surface of `conflux_common` the way the
//! primitives crate consumes it: shared clocks, duration serde helpers inside
//! a config struct, error conversions and the async testing helpers.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conflux_common::testing::{poll_until, timeout_ok};
use conflux_common::{
    duration_millis, Clock, CommonError, ErrorClassification, LogFormat, LoggingConfig, MockClock,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct BreakerSection {
    failure_threshold: u32,
    #[serde(with = "duration_millis")]
    timeout: Duration,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Document {
    breaker: BreakerSection,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Verifies that a config document with millisecond durations and a logging
/// section parses from TOML and survives a JSON round trip.
#[test]
fn test_config_document_parses_across_formats() {
    let raw = r#"
        [breaker]
        failure_threshold = 3
        timeout = 1500

        [logging]
        level = "conflux_core=debug"
        format = "pretty"
    "#;

    let doc: Document = toml::from_str(raw).expect("document should parse");
    assert_eq!(doc.breaker.timeout, Duration::from_millis(1500));
    assert_eq!(doc.logging.format, LogFormat::Pretty);
    assert!(doc.logging.with_target);

    let json = serde_json::to_string(&doc).expect("document should serialize");
    assert!(json.contains("\"timeout\":1500"));
    let back: Document = serde_json::from_str(&json).expect("json should parse");
    assert_eq!(back, doc);
}

/// Verifies that parse failures convert into classified `CommonError`s.
#[test]
fn test_parse_failures_become_common_errors() {
    let parse: Result<Document, _> = toml::from_str("[breaker]\nfailure_threshold = \"x\"");
    let err: CommonError = parse.unwrap_err().into();

    assert!(err.to_string().starts_with("Serialization error (TOML)"));
    assert!(!err.is_retryable());

    let io: CommonError = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
    assert!(io.is_retryable());
}

/// Verifies that a shared mock clock drives elapsed-time checks made by
/// another owner.
#[test]
fn test_mock_clock_shared_between_owners() {
    let clock = MockClock::new();
    let owner: Arc<dyn Clock> = Arc::new(clock.clone());
    let opened_at = owner.now();

    clock.advance(Duration::from_secs(30));

    assert_eq!(owner.now().duration_since(opened_at), Duration::from_secs(30));
}

/// Verifies the async helpers observe work completed on a spawned task.
#[tokio::test(flavor = "multi_thread")]
async fn test_async_helpers_observe_background_work() {
    let counter = Arc::new(AtomicUsize::new(0));
    let writer = counter.clone();

    let handle = tokio::spawn(async move {
        for _ in 0..5 {
            writer.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    let reached = poll_until(Duration::from_secs(1), Duration::from_millis(5), || {
        let counter = counter.clone();
        async move { counter.load(Ordering::SeqCst) == 5 }
    })
    .await;
    assert!(reached);

    timeout_ok(Duration::from_secs(1), handle)
        .await
        .expect("task should finish")
        .expect("task should not panic");
}
