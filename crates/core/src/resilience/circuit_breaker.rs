//! Circuit breaker
//!
//! Closed → Open after `failure_threshold` consecutive failures. Open → HalfOpen
//! on the first call at least `timeout` after the last failure. HalfOpen →
//! Closed after `success_threshold` successes, or back to Open on any failure.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use conflux_common::{duration_millis, Clock, SystemClock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use crate::context::Context;

//==============================================================================
// Circuit State
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected immediately
    Open,
    /// Circuit is half-open, limited requests probe for recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

//==============================================================================
// Configuration
//==============================================================================

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before opening
    pub failure_threshold: u32,
    /// Successes in HalfOpen before closing
    pub success_threshold: u32,
    /// Time after the last failure before an Open circuit admits a probe
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Concurrent probes allowed in HalfOpen; 0 means unlimited
    pub max_concurrent: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            max_concurrent: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Replace zero values with their defaults
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.failure_threshold == 0 {
            self.failure_threshold = defaults.failure_threshold;
        }
        if self.success_threshold == 0 {
            self.success_threshold = defaults.success_threshold;
        }
        if self.timeout.is_zero() {
            self.timeout = defaults.timeout;
        }
        self
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_concurrent(mut self, max: u32) -> Self {
        self.config.max_concurrent = max;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//==============================================================================
// Circuit Breaker
//==============================================================================

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    /// Consecutive failures counted in Closed
    pub failure_count: u32,
    /// Successes counted in the current HalfOpen period
    pub success_count: u32,
    /// Probes currently in flight
    pub half_open_in_flight: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub last_failure_time: Option<Instant>,
    pub state_change_time: Instant,
}

type StateListener = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    half_open_in_flight: u32,
    last_failure: Option<Instant>,
    state_changed_at: Instant,
}

impl BreakerState {
    /// Switch state, returning the transition if one happened
    fn transition(
        &mut self,
        to: CircuitState,
        now: Instant,
    ) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        self.state_changed_at = now;
        Some((from, to))
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    total: AtomicU64,
    rejected: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Why the breaker refused a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    Open,
    TooManyConcurrent,
}

impl Rejection {
    pub(crate) fn into_error<E>(self) -> ResilienceError<E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            Rejection::Open => ResilienceError::CircuitOpen,
            Rejection::TooManyConcurrent => ResilienceError::TooManyConcurrent,
        }
    }
}

/// Admission to run one call through the breaker
///
/// Holds a half-open probe slot when it was admitted as a probe; the slot is
/// released when the permit is dropped, even if the call panics or is
/// cancelled before recording an outcome.
#[must_use = "record the call outcome with `success` or `failure`"]
pub(crate) struct CallPermit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    probe: bool,
}

impl<C: Clock> CallPermit<'_, C> {
    pub(crate) fn success(self) {
        self.breaker.record_success();
    }

    pub(crate) fn failure(self) {
        self.breaker.record_failure();
    }
}

impl<C: Clock> Drop for CallPermit<'_, C> {
    fn drop(&mut self) {
        if self.probe {
            let mut inner = self.breaker.lock_state();
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}

/// Generic circuit breaker
///
/// All state lives behind one lock so transitions are atomic with respect to
/// admission. The state-change listener runs after the lock is released.
///
/// # Examples
///
/// ```rust
/// use conflux_core::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
///
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
/// let result: Result<u32, _> = breaker.call(|| Ok::<_, std::io::Error>(7));
/// assert_eq!(result.unwrap(), 7);
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// ```
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    counters: CallCounters,
    listener: parking_lot::RwLock<Option<StateListener>>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock_state();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failures", &inner.failures)
            .field("successes", &inner.successes)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a circuit breaker using the system clock.
    ///
    /// Zero thresholds or timeout fall back to their defaults.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Self {
        let now = clock.now();
        Self {
            config: config.normalized(),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                half_open_in_flight: 0,
                last_failure: None,
                state_changed_at: now,
            }),
            counters: CallCounters::default(),
            listener: parking_lot::RwLock::new(None),
            clock,
        }
    }

    /// Register a callback invoked with `(from, to)` on every transition.
    ///
    /// Replaces any previous callback. The callback runs outside the
    /// breaker's lock and may call back into the breaker.
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        *self.listener.write() = Some(Arc::new(listener));
    }

    fn lock_state(&self) -> MutexGuard<'_, BreakerState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Circuit breaker state lock poisoned");
                poisoned.into_inner()
            }
        }
    }

    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = transition else {
            return;
        };

        match to {
            CircuitState::Open => warn!(%from, %to, "circuit breaker opened"),
            CircuitState::HalfOpen => info!(%from, %to, "circuit breaker half-open"),
            CircuitState::Closed => info!(%from, %to, "circuit breaker closed"),
        }

        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener(from, to);
        }
    }

    /// Decide whether a call may proceed
    pub(crate) fn admit(&self) -> Result<CallPermit<'_, C>, Rejection> {
        let now = self.clock.now();
        let mut transition = None;

        let admitted = {
            let mut inner = self.lock_state();

            if inner.state == CircuitState::Open {
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |failed_at| now.saturating_duration_since(failed_at) >= self.config.timeout);
                if cooled_down {
                    inner.successes = 0;
                    inner.half_open_in_flight = 0;
                    transition = inner.transition(CircuitState::HalfOpen, now);
                }
            }

            match inner.state {
                CircuitState::Closed => Ok(false),
                CircuitState::Open => Err(Rejection::Open),
                CircuitState::HalfOpen if self.config.max_concurrent == 0 => Ok(false),
                CircuitState::HalfOpen => {
                    if inner.half_open_in_flight >= self.config.max_concurrent {
                        Err(Rejection::TooManyConcurrent)
                    } else {
                        inner.half_open_in_flight += 1;
                        Ok(true)
                    }
                }
            }
        };

        self.notify(transition);

        match admitted {
            Ok(probe) => {
                self.counters.total.fetch_add(1, Ordering::Relaxed);
                Ok(CallPermit { breaker: self, probe })
            }
            Err(rejection) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(?rejection, "circuit breaker rejected call");
                Err(rejection)
            }
        }
    }

    /// Execute an async operation with circuit breaker protection
    #[instrument(skip(self, operation), fields(state = %self.state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.admit().map_err(Rejection::into_error)?;

        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) => {
                permit.failure();
                debug!(%error, "circuit breaker recorded failure");
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Like [`execute`](Self::execute), handing the operation a child context
    #[instrument(skip(self, ctx, operation), fields(state = %self.state()))]
    pub async fn execute_with_context<F, Fut, T, E>(
        &self,
        ctx: &Context,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.admit().map_err(Rejection::into_error)?;

        match operation(ctx.child()).await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) => {
                permit.failure();
                debug!(%error, "circuit breaker recorded failure");
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Execute a synchronous operation with circuit breaker protection
    #[instrument(skip(self, operation), fields(state = %self.state()))]
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.admit().map_err(Rejection::into_error)?;

        match operation() {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) => {
                permit.failure();
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    fn record_success(&self) {
        self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();

        let transition = {
            let mut inner = self.lock_state();
            match inner.state {
                CircuitState::Closed => {
                    inner.failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.successes += 1;
                    if inner.successes >= self.config.success_threshold {
                        inner.failures = 0;
                        inner.successes = 0;
                        inner.transition(CircuitState::Closed, now)
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };

        self.notify(transition);
    }

    fn record_failure(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();

        let transition = {
            let mut inner = self.lock_state();
            inner.last_failure = Some(now);
            match inner.state {
                CircuitState::Closed => {
                    inner.failures += 1;
                    if inner.failures >= self.config.failure_threshold {
                        inner.transition(CircuitState::Open, now)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    inner.failures = self.config.failure_threshold;
                    inner.transition(CircuitState::Open, now)
                }
                CircuitState::Open => None,
            }
        };

        self.notify(transition);
    }

    /// Force the breaker to Closed and clear all counters.
    ///
    /// The listener fires only if the state actually changed.
    pub fn reset(&self) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.lock_state();
            inner.failures = 0;
            inner.successes = 0;
            inner.half_open_in_flight = 0;
            inner.transition(CircuitState::Closed, now)
        };
        info!("Circuit breaker manually reset to closed state");
        self.notify(transition);
    }

    /// Current state without triggering the Open → HalfOpen check
    pub fn state(&self) -> CircuitState {
        self.lock_state().state
    }

    /// Consecutive failures counted so far
    pub fn failures(&self) -> u32 {
        self.lock_state().failures
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.lock_state();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failures,
            success_count: inner.successes,
            half_open_in_flight: inner.half_open_in_flight,
            total_calls: self.counters.total.load(Ordering::Relaxed),
            rejected_calls: self.counters.rejected.load(Ordering::Relaxed),
            successful_calls: self.counters.succeeded.load(Ordering::Relaxed),
            failed_calls: self.counters.failed.load(Ordering::Relaxed),
            last_failure_time: inner.last_failure,
            state_change_time: inner.state_changed_at,
        }
    }
}
