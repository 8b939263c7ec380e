//! # Conflux Core
//!
//! In-process concurrency and resilience primitives built on tokio.
//!
//! This crate contains:
//! - A Go-style cancellation [`Context`] shared by every blocking operation
//! - Synchronisation helpers: [`Semaphore`], [`ErrorGroup`]
//! - Work distribution: [`WorkerPool`], [`FanOutFanIn`], [`Pipeline`]
//! - Resilience: [`CircuitBreaker`], [`TokenBucket`], [`SlidingWindow`],
//!   [`Retryer`] and the composed [`ResilientClient`]
//!
//! ## Architecture Principles
//! - Only depends on `conflux-common`
//! - Every primitive is an explicit instance owned by its caller; there are no
//!   process-wide singletons
//! - Panics inside user callbacks are recovered and surface as error values
//! - Every operation that can block selects on [`Context::done`]

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod config;
pub mod context;
pub mod resilience;
pub mod sync;
pub mod workers;

mod panic;

pub use config::ConfluxConfig;
pub use context::{Context, ContextError};
pub use resilience::{
    AlwaysRetry, CircuitBreaker, CircuitBreakerConfig, CircuitState, ClassifiedRetry, ConfigError,
    NeverRetry, Permanent, PredicateRetry, RateLimiter, ResilienceError, ResilientClient,
    ResilientClientConfig, RetryConfig, RetryDecision, RetryError, RetryPolicy, RetryResult,
    Retryer, SlidingWindow, TokenBucket, Transient,
};
pub use sync::{ErrorGroup, GroupError, Semaphore, SemaphoreError, SemaphoreGuard, TaskError};
pub use workers::{
    FanOutFanIn, Job, JobError, JobResult, MapStage, Pipeline, PoolError, PoolMetrics, PoolState,
    ProcessError, ProcessResult, Stage, WorkerPool, WorkerPoolConfig,
};
