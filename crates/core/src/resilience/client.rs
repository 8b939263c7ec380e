//! Rate limiter, circuit breaker and retryer composed around one call
//!
//! Order of evaluation:
//!
//! 1. the rate limiter (if any) admits or rejects without waiting
//! 2. the circuit breaker admits the call as a whole
//! 3. the retryer runs the operation, retrying inside that single admission
//!
//! The breaker therefore sees one outcome per client call, not one per
//! attempt: a call that succeeds on its third attempt records a success.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use conflux_common::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, Rejection};
use super::rate_limiter::{RateLimiter, TokenBucket, TokenBucketConfig};
use super::retry::{AlwaysRetry, RetryConfig, RetryPolicy, Retryer};
use super::{ResilienceError, ResilienceResult};
use crate::context::Context;

/// Configuration for [`ResilientClient`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilientClientConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    /// Token bucket in front of the breaker; absent means no rate limit
    pub rate_limit: Option<TokenBucketConfig>,
}

/// Client combining rate limiting, circuit breaking and retries
pub struct ResilientClient<P = AlwaysRetry, C: Clock = SystemClock> {
    breaker: CircuitBreaker<C>,
    retryer: Retryer<P>,
    limiter: Option<Arc<dyn RateLimiter>>,
}

impl<P: fmt::Debug, C: Clock> fmt::Debug for ResilientClient<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("breaker", &self.breaker)
            .field("retryer", &self.retryer)
            .field("limiter", &self.limiter.as_ref().map(|limiter| limiter.name()))
            .finish()
    }
}

impl ResilientClient<AlwaysRetry, SystemClock> {
    /// Build a client from configuration, retrying every error
    pub fn new(config: ResilientClientConfig) -> Self {
        let limiter = config
            .rate_limit
            .as_ref()
            .map(|bucket| Arc::new(TokenBucket::from_config(bucket)) as Arc<dyn RateLimiter>);

        Self {
            breaker: CircuitBreaker::new(config.circuit_breaker),
            retryer: Retryer::new(config.retry),
            limiter,
        }
    }

    pub fn builder() -> ResilientClientBuilder<AlwaysRetry, SystemClock> {
        ResilientClientBuilder::new()
    }
}

impl<P, C: Clock> ResilientClient<P, C> {
    /// Run `operation` through the limiter, breaker and retryer.
    ///
    /// Rejections by the limiter or breaker return without calling
    /// `operation`. Otherwise the retryer's final outcome is recorded with the
    /// breaker once and failures carry the attempt count.
    #[instrument(skip(self, ctx, operation), fields(state = %self.breaker.state()))]
    pub async fn execute<F, Fut, T, E>(&self, ctx: &Context, operation: F) -> ResilienceResult<T, E>
    where
        P: RetryPolicy<E>,
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(limiter) = &self.limiter {
            if !limiter.allow() {
                debug!(limiter = limiter.name(), "call rate limited");
                return Err(ResilienceError::RateLimited);
            }
        }

        let permit = self.breaker.admit().map_err(Rejection::into_error)?;
        let result = self.retryer.execute_with_context(ctx, operation).await;

        match result.outcome {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(source) => {
                permit.failure();
                Err(ResilienceError::Failed { attempts: result.attempts, source })
            }
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker<C> {
        &self.breaker
    }

    pub fn retryer(&self) -> &Retryer<P> {
        &self.retryer
    }

    pub fn rate_limiter(&self) -> Option<&dyn RateLimiter> {
        self.limiter.as_deref()
    }
}

/// Builder for [`ResilientClient`] with a custom policy, clock or limiter
pub struct ResilientClientBuilder<P = AlwaysRetry, C: Clock = SystemClock> {
    breaker_config: CircuitBreakerConfig,
    retry_config: RetryConfig,
    policy: P,
    clock: C,
    limiter: Option<Arc<dyn RateLimiter>>,
}

impl ResilientClientBuilder<AlwaysRetry, SystemClock> {
    pub fn new() -> Self {
        Self {
            breaker_config: CircuitBreakerConfig::default(),
            retry_config: RetryConfig::default(),
            policy: AlwaysRetry,
            clock: SystemClock,
            limiter: None,
        }
    }
}

impl Default for ResilientClientBuilder<AlwaysRetry, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, C: Clock> ResilientClientBuilder<P, C> {
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Use any limiter, e.g. a [`SlidingWindow`](super::SlidingWindow)
    pub fn rate_limiter<L: RateLimiter + 'static>(mut self, limiter: L) -> Self {
        self.limiter = Some(Arc::new(limiter));
        self
    }

    pub fn token_bucket(self, config: &TokenBucketConfig) -> Self {
        self.rate_limiter(TokenBucket::from_config(config))
    }

    pub fn policy<Q>(self, policy: Q) -> ResilientClientBuilder<Q, C> {
        ResilientClientBuilder {
            breaker_config: self.breaker_config,
            retry_config: self.retry_config,
            policy,
            clock: self.clock,
            limiter: self.limiter,
        }
    }

    /// Clock for the circuit breaker (useful for testing)
    pub fn clock<K: Clock>(self, clock: K) -> ResilientClientBuilder<P, K> {
        ResilientClientBuilder {
            breaker_config: self.breaker_config,
            retry_config: self.retry_config,
            policy: self.policy,
            clock,
            limiter: self.limiter,
        }
    }

    pub fn build(self) -> ResilientClient<P, C> {
        ResilientClient {
            breaker: CircuitBreaker::with_clock(self.breaker_config, self.clock),
            retryer: Retryer::with_policy(self.retry_config, self.policy),
            limiter: self.limiter,
        }
    }
}
