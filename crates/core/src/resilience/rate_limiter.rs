//! Rate limiting for controlling request rates
//!
//! Two algorithms share the [`RateLimiter`] trait:
//! - **Token Bucket**: continuous refill, bursts up to capacity
//! - **Sliding Window**: at most N requests in any trailing window
//!
//! Both read time through [`Clock`] and are safe to share across tasks.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use conflux_common::{duration_millis, Clock, SystemClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::context::{Context, ContextError};

/// Upper bound on a single sleep while waiting for tokens
const MAX_WAIT_POLL: Duration = Duration::from_millis(10);
const MIN_WAIT_POLL: Duration = Duration::from_millis(1);

/// Admission control shared by all limiters
pub trait RateLimiter: Send + Sync {
    /// Consume one unit of capacity if available, never blocking
    fn allow(&self) -> bool;

    /// Algorithm name for logs
    fn name(&self) -> &'static str;
}

/// Errors from blocking token acquisition
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum RateLimitError {
    /// More tokens were requested than the bucket can ever hold
    #[error("requested {requested} tokens exceeds bucket capacity {capacity}")]
    ExceedsCapacity { requested: f64, capacity: f64 },

    /// Zero, negative or non-finite token counts
    #[error("invalid token request {requested}")]
    InvalidRequest { requested: f64 },

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Non-positive or non-finite values fall back to one
fn positive_or_one(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        1.0
    }
}

/// A bucket must hold at least one whole token or `allow` could never pass
fn capacity_at_least_one(value: f64) -> f64 {
    positive_or_one(value).max(1.0)
}

fn valid_request(n: f64) -> bool {
    n.is_finite() && n > 0.0
}

//==============================================================================
// Token Bucket
//==============================================================================

/// Configuration for [`TokenBucket`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBucketConfig {
    /// Maximum tokens held; also the burst size
    pub capacity: f64,
    /// Tokens added per second
    pub refill_per_second: f64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self { capacity: 100.0, refill_per_second: 10.0 }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    rate: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(capacity);
        self.last_refill = now;
    }
}

/// Token bucket rate limiter
///
/// Starts full. Tokens accrue continuously at `rate` per second and never
/// exceed `capacity`.
///
/// # Examples
///
/// ```rust
/// use conflux_core::{RateLimiter, TokenBucket};
///
/// let bucket = TokenBucket::new(2.0, 1.0);
/// assert!(bucket.allow());
/// assert!(bucket.allow());
/// assert!(!bucket.allow());
/// ```
pub struct TokenBucket<C: Clock = SystemClock> {
    capacity: f64,
    state: Mutex<BucketState>,
    clock: C,
}

impl<C: Clock> fmt::Debug for TokenBucket<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("rate", &state.rate)
            .field("tokens", &state.tokens)
            .finish()
    }
}

impl TokenBucket<SystemClock> {
    /// Create a bucket holding `capacity` tokens refilled at `rate` per second.
    ///
    /// Non-positive values are clamped to 1, and capacity never drops
    /// below one token.
    pub fn new(capacity: f64, rate: f64) -> Self {
        Self::with_clock(capacity, rate, SystemClock)
    }

    pub fn from_config(config: &TokenBucketConfig) -> Self {
        Self::new(config.capacity, config.refill_per_second)
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Create a bucket with a custom clock (useful for testing)
    pub fn with_clock(capacity: f64, rate: f64, clock: C) -> Self {
        let capacity = capacity_at_least_one(capacity);
        let state =
            BucketState { tokens: capacity, rate: positive_or_one(rate), last_refill: clock.now() };
        Self { capacity, state: Mutex::new(state), clock }
    }

    /// Take `n` tokens if available. Zero, negative or non-finite `n` is
    /// always denied.
    pub fn allow_n(&self, n: f64) -> bool {
        if !valid_request(n) {
            debug!(requested = n, "token bucket rejected invalid request");
            return false;
        }
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.refill(now, self.capacity);

        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            debug!(requested = n, available = state.tokens, "token bucket denied request");
            false
        }
    }

    /// Wait for a single token
    pub async fn wait(&self, ctx: &Context) -> Result<(), ContextError> {
        self.wait_for(ctx, 1.0).await
    }

    /// Wait until `n` tokens are available, then take them.
    ///
    /// Fails immediately when `n` is not a positive count or exceeds the
    /// capacity, and with the context's error if it ends first.
    #[instrument(skip(self, ctx))]
    pub async fn wait_n(&self, ctx: &Context, n: f64) -> Result<(), RateLimitError> {
        if !valid_request(n) {
            return Err(RateLimitError::InvalidRequest { requested: n });
        }
        if n > self.capacity {
            return Err(RateLimitError::ExceedsCapacity { requested: n, capacity: self.capacity });
        }
        self.wait_for(ctx, n).await.map_err(RateLimitError::from)
    }

    async fn wait_for(&self, ctx: &Context, n: f64) -> Result<(), ContextError> {
        loop {
            let deficit = {
                let now = self.clock.now();
                let mut state = self.state.lock();
                state.refill(now, self.capacity);
                if state.tokens >= n {
                    state.tokens -= n;
                    return Ok(());
                }
                (n - state.tokens) / state.rate
            };

            let delay = Duration::try_from_secs_f64(deficit)
                .unwrap_or(MAX_WAIT_POLL)
                .clamp(MIN_WAIT_POLL, MAX_WAIT_POLL);

            tokio::select! {
                biased;
                reason = ctx.done() => return Err(reason),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Current token count after refilling
    pub fn tokens(&self) -> f64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.refill(now, self.capacity);
        state.tokens
    }

    /// Change the refill rate.
    ///
    /// Tokens accrued at the old rate are credited first. Non-positive or
    /// non-finite rates are ignored.
    pub fn set_rate(&self, rate: f64) {
        if !(rate.is_finite() && rate > 0.0) {
            warn!(rate, "ignoring invalid token bucket rate");
            return;
        }
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.refill(now, self.capacity);
        state.rate = rate;
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }
}

impl<C: Clock> RateLimiter for TokenBucket<C> {
    fn allow(&self) -> bool {
        self.allow_n(1.0)
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }
}

//==============================================================================
// Sliding Window
//==============================================================================

/// Configuration for [`SlidingWindow`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlidingWindowConfig {
    #[serde(with = "duration_millis")]
    pub window: Duration,
    pub max_requests: usize,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self { window: Duration::from_secs(1), max_requests: 100 }
    }
}

/// Sliding window rate limiter
///
/// Admits at most `max_requests` within any trailing `window`. A request
/// stamped at `t` stops counting once `now - t >= window`.
pub struct SlidingWindow<C: Clock = SystemClock> {
    window: Duration,
    max_requests: usize,
    requests: Mutex<VecDeque<Instant>>,
    clock: C,
}

impl<C: Clock> fmt::Debug for SlidingWindow<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindow")
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field("recorded", &self.requests.lock().len())
            .finish()
    }
}

impl SlidingWindow<SystemClock> {
    /// Zero window falls back to one second, zero max to one request
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self::with_clock(window, max_requests, SystemClock)
    }

    pub fn from_config(config: &SlidingWindowConfig) -> Self {
        Self::new(config.window, config.max_requests)
    }
}

impl<C: Clock> SlidingWindow<C> {
    pub fn with_clock(window: Duration, max_requests: usize, clock: C) -> Self {
        let window = if window.is_zero() { Duration::from_secs(1) } else { window };
        Self {
            window,
            max_requests: max_requests.max(1),
            requests: Mutex::new(VecDeque::with_capacity(max_requests.clamp(1, 1024))),
            clock,
        }
    }

    fn expired(&self, now: Instant, stamp: Instant) -> bool {
        now.saturating_duration_since(stamp) >= self.window
    }

    /// Requests still counted against the window
    pub fn requests_in_window(&self) -> usize {
        let now = self.clock.now();
        self.requests.lock().iter().filter(|stamp| !self.expired(now, **stamp)).count()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }
}

impl<C: Clock> RateLimiter for SlidingWindow<C> {
    fn allow(&self) -> bool {
        let now = self.clock.now();
        let mut requests = self.requests.lock();

        while requests.front().is_some_and(|stamp| self.expired(now, *stamp)) {
            requests.pop_front();
        }

        if requests.len() >= self.max_requests {
            debug!(in_window = requests.len(), "sliding window denied request");
            return false;
        }
        requests.push_back(now);
        true
    }

    fn name(&self) -> &'static str {
        "sliding_window"
    }
}
