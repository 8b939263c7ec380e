//! Work distribution primitives
//!
//! - [`WorkerPool`]: long-lived pool of workers draining a bounded job queue
//! - [`FanOutFanIn`]: process a batch across N workers and gather the results
//! - [`Pipeline`]: chain channel-connected stages into a linear transform

pub mod fan_out;
pub mod pipeline;
pub mod pool;

pub use fan_out::{FanOutConfig, FanOutFanIn, ProcessError, ProcessFn, ProcessResult};
pub use pipeline::{MapStage, Pipeline, Stage};
pub use pool::{
    Job, JobError, JobHandler, JobResult, PoolError, PoolMetrics, PoolState, WorkerPool,
    WorkerPoolConfig,
};
