//! Integration tests for the resilience module
//!
//! Exercises the circuit breaker against real time, and the composed
//! `ResilientClient` with limiters, retry policies and shared concurrent use.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conflux_common::MockClock;
use conflux_core::resilience::{RateLimiter, TokenBucketConfig};
use conflux_core::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ClassifiedRetry, Context, ErrorGroup,
    Permanent, ResilienceError, ResilientClient, ResilientClientConfig, RetryConfig, RetryError,
    SlidingWindow, TokenBucket, Transient,
};

#[derive(Debug, thiserror::Error)]
#[error("upstream unavailable")]
struct Unavailable;

fn fail() -> Result<(), Unavailable> {
    Err(Unavailable)
}

/// Validates the circuit breaker recovery cycle against the system clock.
///
/// # Test Steps
/// 1. Configure thresholds 2 failures / 1 success with a 50ms timeout
/// 2. Fail twice and verify the circuit opens
/// 3. Verify an immediate call is rejected without running
/// 4. Sleep past the timeout and verify one success closes the circuit
#[tokio::test(flavor = "multi_thread")]
async fn test_circuit_breaker_open_and_recover() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .success_threshold(1)
        .timeout(Duration::from_millis(50))
        .build()
        .expect("valid config");
    let breaker = CircuitBreaker::new(config);

    assert!(breaker.execute(|| async { fail() }).await.is_err());
    assert!(breaker.execute(|| async { fail() }).await.is_err());
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = breaker.execute(|| async { Ok::<_, Unavailable>(()) }).await;
    assert!(matches!(rejected, Err(ResilienceError::CircuitOpen)));

    tokio::time::sleep(Duration::from_millis(60)).await;
    breaker.execute(|| async { Ok::<_, Unavailable>(()) }).await.expect("probe admitted");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Validates that concurrent callers see one half-open probe at a time.
///
/// Assertions:
/// - Confirms exactly one of several simultaneous callers is admitted as the
///   probe while the others get `TooManyConcurrent`.
#[tokio::test(flavor = "multi_thread")]
async fn test_half_open_admits_single_probe_under_contention() {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(1)
        .success_threshold(1)
        .timeout(Duration::from_millis(10))
        .max_concurrent(1)
        .build()
        .expect("valid config");
    let breaker = Arc::new(CircuitBreaker::with_clock(config, clock.clone()));

    let _ = breaker.call(fail);
    clock.advance_millis(10);

    let (release_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let mut handles = Vec::new();
    for _ in 0..5 {
        let breaker = Arc::clone(&breaker);
        let mut release = release_tx.subscribe();
        handles.push(tokio::spawn(async move {
            breaker
                .execute(|| async move {
                    let _ = release.recv().await;
                    Ok::<_, Unavailable>(())
                })
                .await
        }));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = release_tx.send(());

    let mut admitted = 0;
    let mut too_many = 0;
    for handle in handles {
        match handle.await.expect("task completed") {
            Ok(()) => admitted += 1,
            Err(ResilienceError::TooManyConcurrent) => too_many += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(too_many, 4);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Validates the limiters' documented rates with real time.
///
/// Assertions:
/// - Confirms a token bucket admits exactly its capacity in a burst and at
///   least one more after `1/rate` seconds.
/// - Confirms a sliding window admits again once its window elapses.
#[tokio::test(flavor = "multi_thread")]
async fn test_limiters_with_real_time() {
    let bucket = TokenBucket::new(3.0, 20.0);
    assert_eq!((0..10).filter(|_| bucket.allow()).count(), 3);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(bucket.allow());

    let window = SlidingWindow::new(Duration::from_millis(40), 2);
    assert!(window.allow());
    assert!(window.allow());
    assert!(!window.allow());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(window.allow());
}

/// Validates a configured `ResilientClient` shared across tasks.
///
/// # Test Steps
/// 1. Build a client from config with a 5-token bucket
/// 2. Fire 8 concurrent calls through an `ErrorGroup`
/// 3. Verify 5 run and 3 are rate limited
#[tokio::test(flavor = "multi_thread")]
async fn test_shared_client_rate_limits_concurrent_calls() {
    let client = Arc::new(ResilientClient::new(ResilientClientConfig {
        rate_limit: Some(TokenBucketConfig { capacity: 5.0, refill_per_second: 0.001 }),
        ..ResilientClientConfig::default()
    }));
    let ran = Arc::new(AtomicU32::new(0));
    let group: ErrorGroup<ResilienceError<Unavailable>> = ErrorGroup::new(&Context::background());

    for _ in 0..8 {
        let client = Arc::clone(&client);
        let ran = Arc::clone(&ran);
        group.go(move |ctx| async move {
            client
                .execute(&ctx, |_ctx| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, Unavailable>(()) }
                })
                .await
        });
    }

    let errors = group.wait().await.expect_err("some calls are limited").into_errors();
    assert_eq!(errors.len(), 3);
    assert_eq!(ran.load(Ordering::SeqCst), 5);
    assert!(errors.iter().all(|e| e.to_string() == "rate limited"));
    assert_eq!(client.rate_limiter().map(|l| l.name()), Some("token_bucket"));
}

/// Validates `ClassifiedRetry` through the client.
///
/// Assertions:
/// - Confirms transient errors are retried until exhaustion.
/// - Confirms permanent errors stop after one attempt.
#[tokio::test(flavor = "multi_thread")]
async fn test_client_with_classified_policy() {
    let client = ResilientClient::builder()
        .retry(
            RetryConfig::builder()
                .max_retries(2)
                .initial_backoff(Duration::from_millis(1))
                .max_backoff(Duration::from_millis(2))
                .build()
                .expect("valid config"),
        )
        .policy(ClassifiedRetry)
        .build();
    let ctx = Context::background();

    let transient = client
        .execute(&ctx, |_ctx| async { Err::<(), _>(Transient(Unavailable)) })
        .await
        .unwrap_err();
    assert!(matches!(
        transient,
        ResilienceError::Failed { attempts: 3, source: RetryError::Exhausted { .. } }
    ));

    let permanent = client
        .execute(&ctx, |_ctx| async { Err::<(), _>(Permanent(Unavailable)) })
        .await
        .unwrap_err();
    assert!(matches!(
        permanent,
        ResilienceError::Failed { attempts: 1, source: RetryError::NonRetryable { .. } }
    ));
    assert_eq!(
        permanent.to_string(),
        "failed after 1 attempts: non-retryable error after 1 attempts: permanent: upstream \
         unavailable"
    );
}

/// Validates that client calls stop retrying when the caller's context ends.
///
/// Assertions:
/// - Confirms the retry error carries the context reason.
/// - Confirms the cancelled call counts as a breaker failure.
#[tokio::test(flavor = "multi_thread")]
async fn test_client_respects_caller_deadline() {
    let client = ResilientClient::builder()
        .retry(
            RetryConfig::builder()
                .max_retries(50)
                .initial_backoff(Duration::from_millis(20))
                .build()
                .expect("valid config"),
        )
        .build();
    let ctx = Context::background().with_timeout(Duration::from_millis(50));

    let err = client.execute(&ctx, |_ctx| async { fail() }).await.unwrap_err();
    assert!(matches!(
        err,
        ResilienceError::Failed { source: RetryError::Canceled { .. }, .. }
    ));
    assert_eq!(client.circuit_breaker().failures(), 1);
}
