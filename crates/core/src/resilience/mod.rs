//! Resilience patterns for fault-tolerant calls
//!
//! - [`rate_limiter`]: token bucket and sliding window admission control
//! - [`circuit_breaker`]: fail fast while a dependency is unhealthy
//! - [`retry`]: exponential backoff with jitter and pluggable policies
//! - [`client`]: the three composed around a single call
//!
//! Every pattern reads time through [`conflux_common::Clock`], so tests can
//! drive state machines with [`conflux_common::MockClock`] instead of sleeping.

use conflux_common::{CommonError, ErrorClassification, ErrorSeverity};
use thiserror::Error;

pub mod circuit_breaker;
pub mod client;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState,
};
pub use client::{ResilientClient, ResilientClientBuilder, ResilientClientConfig};
pub use rate_limiter::{
    RateLimitError, RateLimiter, SlidingWindow, SlidingWindowConfig, TokenBucket, TokenBucketConfig,
};
pub use retry::{
    is_permanent, is_transient, AlwaysRetry, ClassifiedRetry, NeverRetry, Permanent,
    PredicateRetry, RetryConfig, RetryConfigBuilder, RetryDecision, RetryError, RetryPolicy,
    RetryResult, Retryer, Transient,
};

//==============================================================================
// Error Types
//==============================================================================

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

impl From<ConfigError> for CommonError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid { message } => CommonError::config(message),
        }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors from breaker- and limiter-protected calls
///
/// Generic over the operation's own error type `E`, which is preserved as the
/// error source.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The circuit is open and the call was not attempted
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The half-open probe limit is reached
    #[error("too many concurrent requests in half-open state")]
    TooManyConcurrent,

    /// The rate limiter denied the call
    #[error("rate limited")]
    RateLimited,

    /// The protected operation failed
    #[error("operation failed: {source}")]
    OperationFailed {
        #[source]
        source: E,
    },

    /// The operation failed after the retryer gave up
    #[error("failed after {attempts} attempts: {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: RetryError<E>,
    },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether the call was rejected before the operation ran
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen | Self::TooManyConcurrent | Self::RateLimited)
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        self.is_rejection()
    }

    fn severity(&self) -> ErrorSeverity {
        if self.is_rejection() {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        }
    }
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
