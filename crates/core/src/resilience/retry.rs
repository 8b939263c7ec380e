//! Retry with exponential backoff and jitter
//!
//! A [`Retryer`] runs an operation up to `max_retries + 1` times. Between
//! attempts it sleeps `initial_backoff * multiplier^(attempt - 1)`, capped at
//! `max_backoff`, plus up to `jitter_fraction` of that delay at random. A
//! [`RetryPolicy`] decides which errors are worth another attempt.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use conflux_common::{duration_millis, ErrorClassification, ErrorSeverity};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub use self::policies::{AlwaysRetry, ClassifiedRetry, NeverRetry, PredicateRetry};
use super::{ConfigError, ConfigResult};
use crate::context::{Context, ContextError};

//==============================================================================
// Errors and Outcome
//==============================================================================

/// Why a retried operation ultimately failed
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed
    #[error("retries exhausted after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },

    /// The policy declined to retry this error
    #[error("non-retryable error after {attempts} attempts: {source}")]
    NonRetryable { attempts: u32, source: E },

    /// The context ended while waiting to retry
    #[error("retry canceled after {attempts} attempts: {source}")]
    Canceled { attempts: u32, source: ContextError },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::NonRetryable { attempts, .. }
            | Self::Canceled { attempts, .. } => *attempts,
        }
    }

    /// The operation's last error, if the retryer did not stop on the context
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => Some(source),
            Self::Canceled { .. } => None,
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => Some(source),
            Self::Canceled { .. } => None,
        }
    }
}

/// Outcome of a retried operation with attempt statistics
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// Attempts made, including the first
    pub attempts: u32,
    pub outcome: Result<T, RetryError<E>>,
    /// Wall time from the first attempt to completion
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    /// Consume the outcome and return only the result.
    pub fn into_result(self) -> Result<T, RetryError<E>> {
        self.outcome
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

//==============================================================================
// Policy
//==============================================================================

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Decide after `attempt` (1-based) failed with `error`
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the configured backoff
    Retry,
    /// Retry after a specific delay, capped at `max_backoff`
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

//==============================================================================
// Error Markers
//==============================================================================

/// Marks an error as worth retrying
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("retryable: {0}")]
pub struct Transient<E>(#[source] pub E);

/// Marks an error as never worth retrying
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("permanent: {0}")]
pub struct Permanent<E>(#[source] pub E);

impl<E> ErrorClassification for Transient<E> {
    fn is_retryable(&self) -> bool {
        true
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }
}

impl<E> ErrorClassification for Permanent<E> {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }
}

fn chain_contains<M: StdError + 'static>(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if err.is::<M>() {
            return true;
        }
        current = err.source();
    }
    false
}

/// Whether `error` or any error in its source chain is a [`Transient<E>`]
pub fn is_transient<E>(error: &(dyn StdError + 'static)) -> bool
where
    E: StdError + 'static,
{
    chain_contains::<Transient<E>>(error)
}

/// Whether `error` or any error in its source chain is a [`Permanent<E>`]
pub fn is_permanent<E>(error: &(dyn StdError + 'static)) -> bool
where
    E: StdError + 'static,
{
    chain_contains::<Permanent<E>>(error)
}

//==============================================================================
// Configuration
//==============================================================================

/// Configuration for [`Retryer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of each delay added as random jitter, in `[0, 1]`
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_fraction: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.initial_backoff.is_zero() {
            return Err(ConfigError::invalid("initial_backoff must be greater than zero"));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::invalid("max_backoff must be at least initial_backoff"));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier > 0.0) {
            return Err(ConfigError::invalid("backoff_multiplier must be a positive number"));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ConfigError::invalid("jitter_fraction must be between 0 and 1"));
        }
        Ok(())
    }

    /// Replace out-of-range values with their defaults
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.initial_backoff.is_zero() {
            self.initial_backoff = defaults.initial_backoff;
        }
        if self.max_backoff.is_zero() {
            self.max_backoff = defaults.max_backoff;
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier > 0.0) {
            self.backoff_multiplier = defaults.backoff_multiplier;
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            self.jitter_fraction = defaults.jitter_fraction;
        }
        self
    }
}

/// Builder for RetryConfig
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn initial_backoff(mut self, delay: Duration) -> Self {
        self.config.initial_backoff = delay;
        self
    }

    pub fn max_backoff(mut self, delay: Duration) -> Self {
        self.config.max_backoff = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.config.jitter_fraction = fraction;
        self
    }

    /// Shorthand for `jitter_fraction(0.0)`
    pub fn no_jitter(self) -> Self {
        self.jitter_fraction(0.0)
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//==============================================================================
// Retryer
//==============================================================================

/// Runs operations with retries according to a [`RetryConfig`] and policy
#[derive(Debug, Clone)]
pub struct Retryer<P = AlwaysRetry> {
    config: RetryConfig,
    policy: P,
}

impl Retryer<AlwaysRetry> {
    /// Retry every error. Out-of-range config values fall back to defaults.
    pub fn new(config: RetryConfig) -> Self {
        Self::with_policy(config, AlwaysRetry)
    }
}

impl Default for Retryer<AlwaysRetry> {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl<P> Retryer<P> {
    pub fn with_policy(config: RetryConfig, policy: P) -> Self {
        Self { config: config.normalized(), policy }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Backoff before retrying after `attempt` (1-based), without jitter
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let max = self.config.max_backoff.as_secs_f64();
        let secs = (self.config.initial_backoff.as_secs_f64()
            * self.config.backoff_multiplier.powi(exponent))
        .min(max);
        Duration::try_from_secs_f64(secs).unwrap_or(self.config.max_backoff)
    }

    /// Backoff with random jitter applied on top of the capped base
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        if self.config.jitter_fraction == 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen::<f64>() * self.config.jitter_fraction;
        base + base.mul_f64(factor)
    }

    /// Run `operation` with a background context
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_context(&Context::background(), |_ctx| operation()).await
    }

    /// Run `operation` until it succeeds, the policy stops, attempts run out,
    /// or `ctx` ends during a backoff.
    ///
    /// The context is checked only between attempts; an attempt in progress
    /// is never interrupted by the retryer.
    #[instrument(skip(self, ctx, operation), fields(max_retries = self.config.max_retries))]
    pub async fn execute_with_context<F, Fut, T, E>(
        &self,
        ctx: &Context,
        mut operation: F,
    ) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        let outcome = loop {
            attempts += 1;

            let error = match operation(ctx.clone()).await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(attempts, "operation succeeded after retries");
                    }
                    break Ok(value);
                }
                Err(error) => error,
            };

            if attempts > self.config.max_retries {
                warn!(attempts, ?error, "retry attempts exhausted");
                break Err(RetryError::Exhausted { attempts, source: error });
            }

            let delay = match self.policy.should_retry(&error, attempts) {
                RetryDecision::Stop => {
                    debug!(attempts, ?error, "retry policy declined to retry");
                    break Err(RetryError::NonRetryable { attempts, source: error });
                }
                RetryDecision::Retry => self.backoff(attempts),
                RetryDecision::RetryAfter(delay) => delay.min(self.config.max_backoff),
            };

            warn!(attempt = attempts, ?delay, ?error, "operation failed, retrying");

            tokio::select! {
                biased;
                reason = ctx.done() => {
                    debug!(attempts, %reason, "retry canceled during backoff");
                    break Err(RetryError::Canceled { attempts, source: reason });
                }
                () = tokio::time::sleep(delay) => {}
            }
        };

        RetryResult { attempts, outcome, total_duration: started.elapsed() }
    }
}

/// Pre-defined retry policies for common scenarios
pub mod policies {
    use super::*;

    /// Always retry policy - retries on any error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retry policy - never retries
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Predicate-based retry policy
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }

    /// Retry only errors equal to one of a fixed list
    pub fn retry_on<E>(retryable: Vec<E>) -> PredicateRetry<impl Fn(&E, u32) -> bool + Clone>
    where
        E: PartialEq + Clone,
    {
        PredicateRetry::new(move |error: &E, _attempt: u32| retryable.contains(error))
    }

    /// Defer to the error's own [`ErrorClassification`]
    ///
    /// Non-retryable errors stop; a `retry_after` hint overrides the backoff.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ClassifiedRetry;

    impl<E: ErrorClassification> RetryPolicy<E> for ClassifiedRetry {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if !error.is_retryable() {
                return RetryDecision::Stop;
            }
            match error.retry_after() {
                Some(delay) => RetryDecision::RetryAfter(delay),
                None => RetryDecision::Retry,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the retryer and its policies

    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig::builder()
            .max_retries(max_retries)
            .initial_backoff(Duration::from_millis(1))
            .max_backoff(Duration::from_millis(5))
            .no_jitter()
            .build()
            .expect("valid config")
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum ApiError {
        Unavailable,
        BadRequest,
    }

    // =========================================================================
    // Backoff
    // =========================================================================

    /// Validates `Retryer::base_backoff` for the exponential growth scenario.
    ///
    /// Assertions:
    /// - Confirms delays double per attempt and cap at `max_backoff`.
    #[test]
    fn test_base_backoff_grows_and_caps() {
        let retryer = Retryer::new(
            RetryConfig::builder()
                .initial_backoff(Duration::from_millis(100))
                .max_backoff(Duration::from_millis(500))
                .build()
                .unwrap(),
        );

        assert_eq!(retryer.base_backoff(1), Duration::from_millis(100));
        assert_eq!(retryer.base_backoff(2), Duration::from_millis(200));
        assert_eq!(retryer.base_backoff(3), Duration::from_millis(400));
        assert_eq!(retryer.base_backoff(4), Duration::from_millis(500));
        assert_eq!(retryer.base_backoff(u32::MAX), Duration::from_millis(500));
    }

    /// Validates `Retryer::backoff` jitter bounds.
    ///
    /// Assertions:
    /// - Confirms jitter adds between 0 and `jitter_fraction` of the base.
    #[test]
    fn test_backoff_jitter_bounds() {
        let retryer = Retryer::new(RetryConfig {
            initial_backoff: Duration::from_millis(100),
            jitter_fraction: 0.5,
            ..RetryConfig::default()
        });

        for _ in 0..100 {
            let delay = retryer.backoff(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    /// Validates `RetryConfig::normalized` for the out-of-range scenario.
    ///
    /// Assertions:
    /// - Confirms invalid values fall back to defaults.
    /// - Confirms the builder rejects the same values.
    #[test]
    fn test_config_normalization_and_validation() {
        let config = RetryConfig {
            max_retries: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: -1.0,
            jitter_fraction: 3.0,
        };
        let retryer = Retryer::new(config);
        assert_eq!(retryer.config().initial_backoff, Duration::from_millis(100));
        assert_eq!(retryer.config().max_backoff, Duration::from_secs(30));
        assert_eq!(retryer.config().backoff_multiplier, 2.0);
        assert_eq!(retryer.config().jitter_fraction, 0.2);

        assert!(RetryConfig::builder().jitter_fraction(1.5).build().is_err());
        assert!(RetryConfig::builder().backoff_multiplier(f64::NAN).build().is_err());
        assert!(RetryConfig::builder()
            .initial_backoff(Duration::from_secs(2))
            .max_backoff(Duration::from_secs(1))
            .build()
            .is_err());
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Validates `Retryer::execute` for the always failing scenario.
    ///
    /// Assertions:
    /// - Confirms `max_retries + 1` attempts are made.
    /// - Confirms the final underlying error is returned.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let retryer = Retryer::new(fast_config(3));

        let counter = Arc::clone(&calls);
        let result = retryer
            .execute(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(format!("failure {n}")) }
            })
            .await;

        assert_eq!(result.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result.outcome {
            Err(RetryError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert_eq!(source, "failure 4");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    /// Validates `Retryer::execute` for the eventual success scenario.
    ///
    /// Assertions:
    /// - Confirms the retryer stops at the first success.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let retryer = Retryer::new(fast_config(5));

        let counter = Arc::clone(&calls);
        let result = retryer
            .execute(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(io::Error::other("flaky"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.attempts, 3);
        assert_eq!(result.into_result().unwrap(), 2);
    }

    /// Validates a zero `max_retries` scenario.
    ///
    /// Assertions:
    /// - Confirms exactly one attempt is made.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_zero_retries_single_attempt() {
        let retryer = Retryer::new(fast_config(0));
        let result = retryer.execute(|| async { Err::<(), _>("nope") }).await;
        assert_eq!(result.attempts, 1);
        assert!(matches!(result.outcome, Err(RetryError::Exhausted { attempts: 1, .. })));
    }

    /// Validates `PredicateRetry` for the non-retryable error scenario.
    ///
    /// Assertions:
    /// - Confirms the retryer stops on the first non-retryable error.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_predicate_policy_stops() {
        let retryer = Retryer::with_policy(
            fast_config(5),
            policies::retry_on(vec![ApiError::Unavailable]),
        );

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retryer
            .execute(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err::<(), _>(if n == 0 { ApiError::Unavailable } else { ApiError::BadRequest })
                }
            })
            .await;

        assert_eq!(result.attempts, 2);
        assert!(matches!(
            result.outcome,
            Err(RetryError::NonRetryable { attempts: 2, source: ApiError::BadRequest })
        ));
    }

    /// Validates `NeverRetry` and `ClassifiedRetry`.
    ///
    /// Assertions:
    /// - Confirms `NeverRetry` makes one attempt.
    /// - Confirms `ClassifiedRetry` follows the error markers.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_never_and_classified_policies() {
        let never = Retryer::with_policy(fast_config(3), NeverRetry);
        let result = never.execute(|| async { Err::<(), _>("down") }).await;
        assert_eq!(result.attempts, 1);

        let classified = Retryer::with_policy(fast_config(3), ClassifiedRetry);
        let result = classified
            .execute(|| async { Err::<(), _>(Permanent(io::Error::other("gone"))) })
            .await;
        assert_eq!(result.attempts, 1);

        let result = classified
            .execute(|| async { Err::<(), _>(Transient(io::Error::other("busy"))) })
            .await;
        assert_eq!(result.attempts, 4);
    }

    /// Validates `RetryDecision::RetryAfter` delays.
    ///
    /// Assertions:
    /// - Confirms the policy's delay replaces the configured backoff.
    /// - Confirms a delay beyond `max_backoff` is capped.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_after_overrides_backoff() {
        struct Throttled(Duration);
        impl RetryPolicy<&'static str> for Throttled {
            fn should_retry(&self, _error: &&'static str, _attempt: u32) -> RetryDecision {
                RetryDecision::RetryAfter(self.0)
            }
        }

        let config = RetryConfig::builder()
            .max_retries(1)
            .initial_backoff(Duration::from_millis(1))
            .max_backoff(Duration::from_millis(100))
            .no_jitter()
            .build()
            .unwrap();

        let retryer = Retryer::with_policy(config.clone(), Throttled(Duration::from_millis(40)));
        let result = retryer.execute(|| async { Err::<(), _>("slow down") }).await;
        assert_eq!(result.attempts, 2);
        assert!(result.total_duration >= Duration::from_millis(40));

        let retryer = Retryer::with_policy(config, Throttled(Duration::from_secs(60)));
        let result = retryer.execute(|| async { Err::<(), _>("slow down") }).await;
        assert_eq!(result.attempts, 2);
        assert!(result.total_duration >= Duration::from_millis(100));
        assert!(result.total_duration < Duration::from_secs(5));
    }

    /// Validates `Retryer::execute_with_context` for the canceled backoff
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the retryer returns the context error during a long backoff.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_context_cancels_backoff() {
        let retryer = Retryer::new(
            RetryConfig::builder()
                .max_retries(10)
                .initial_backoff(Duration::from_secs(10))
                .max_backoff(Duration::from_secs(10))
                .build()
                .unwrap(),
        );
        let ctx = Context::background().with_timeout(Duration::from_millis(30));

        let started = Instant::now();
        let result = retryer.execute_with_context(&ctx, |_ctx| async { Err::<(), _>("down") }).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.attempts, 1);
        assert!(matches!(
            result.outcome,
            Err(RetryError::Canceled { attempts: 1, source: ContextError::DeadlineExceeded })
        ));
    }

    /// Validates `is_transient` and `is_permanent` for wrapped errors.
    ///
    /// Assertions:
    /// - Confirms markers are found anywhere in the source chain.
    /// - Confirms display strings carry the marker prefix.
    #[test]
    fn test_error_markers() {
        let transient = Transient(io::Error::other("timeout"));
        assert_eq!(transient.to_string(), "retryable: timeout");
        assert!(is_transient::<io::Error>(&transient));
        assert!(!is_permanent::<io::Error>(&transient));

        let wrapped = Permanent(Transient(io::Error::other("nested")));
        assert!(is_permanent::<Transient<io::Error>>(&wrapped));
        assert!(is_transient::<io::Error>(&wrapped));
        assert!(!is_transient::<io::Error>(&io::Error::other("plain")));
    }
}
