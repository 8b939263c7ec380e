//! Fixed-size worker pool over a bounded job queue
//!
//! Jobs carry their own handler, so one pool can run heterogeneous work as
//! long as payload, output and error types agree. Workers share the queue
//! receiver; each job runs under panic recovery and produces exactly one
//! [`JobResult`] on the results channel.
//!
//! Lifecycle: `Created → Running → Stopped`. `start` is idempotent while
//! running; a stopped pool cannot be restarted.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conflux_common::{ErrorClassification, ErrorSeverity};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::context::Context;
use crate::panic::panic_message;

//==============================================================================
// Configuration
//==============================================================================

/// Worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks (0 is treated as 1)
    pub num_workers: usize,
    /// Capacity of the job queue and of the results channel (0 is treated
    /// as 100)
    pub queue_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { num_workers: 4, queue_size: 100 }
    }
}

impl WorkerPoolConfig {
    /// Replace zero values with their defaults
    pub fn normalized(self) -> Self {
        Self {
            num_workers: if self.num_workers == 0 { 1 } else { self.num_workers },
            queue_size: if self.queue_size == 0 { 100 } else { self.queue_size },
        }
    }
}

//==============================================================================
// Jobs and results
//==============================================================================

/// Boxed job handler
pub type JobHandler<P, R, E> =
    Box<dyn FnOnce(Context, P) -> BoxFuture<'static, Result<R, E>> + Send + 'static>;

/// Unit of work submitted to a [`WorkerPool`]
pub struct Job<P, R, E> {
    /// Caller-chosen identifier echoed on the result
    pub id: u64,
    /// Input handed to the handler
    pub payload: P,
    handler: Option<JobHandler<P, R, E>>,
}

impl<P, R, E> Job<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    /// Create a job whose handler receives the pool context and the payload.
    ///
    /// Long-running handlers should observe `ctx.done()` so that
    /// [`WorkerPool::stop`] can interrupt them.
    pub fn new<F, Fut>(id: u64, payload: P, handler: F) -> Self
    where
        F: FnOnce(Context, P) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let handler: JobHandler<P, R, E> =
            Box::new(move |ctx: Context, payload: P| handler(ctx, payload).boxed());
        Self { id, payload, handler: Some(handler) }
    }

    /// Create a job with no handler; it completes with
    /// [`JobError::MissingHandler`]
    pub fn without_handler(id: u64, payload: P) -> Self {
        Self { id, payload, handler: None }
    }
}

impl<P, R, E> Job<P, R, E> {
    /// Whether a handler is attached
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }
}

impl<P: fmt::Debug, R, E> fmt::Debug for Job<P, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .field("has_handler", &self.has_handler())
            .finish()
    }
}

/// Why a job did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError<E> {
    /// The handler returned an error
    #[error("{0}")]
    Failed(E),

    /// The handler panicked
    #[error("panic in job {job_id}: {message}")]
    Panicked { job_id: u64, message: String },

    /// The job was submitted without a handler
    #[error("job {job_id} handler is nil")]
    MissingHandler { job_id: u64 },
}

impl<E: ErrorClassification> ErrorClassification for JobError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Failed(error) => error.is_retryable(),
            Self::Panicked { .. } | Self::MissingHandler { .. } => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Failed(error) => error.severity(),
            Self::Panicked { .. } => ErrorSeverity::Critical,
            Self::MissingHandler { .. } => ErrorSeverity::Error,
        }
    }
}

/// Outcome of one job
#[derive(Debug)]
pub struct JobResult<R, E> {
    /// Identifier of the job
    pub job_id: u64,
    /// Handler output or the reason it is missing
    pub outcome: Result<R, JobError<E>>,
    /// Time spent in the handler
    pub duration: Duration,
    /// Worker that ran the job
    pub worker_id: usize,
}

impl<R, E> JobResult<R, E> {
    /// Whether the handler returned `Ok`
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

//==============================================================================
// Errors and metrics
//==============================================================================

/// Pool lifecycle and admission errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool is stopping or stopped and accepts no more jobs
    #[error("worker pool is shutting down")]
    ShuttingDown,

    /// `start` was called after the pool stopped
    #[error("worker pool is stopped and cannot be restarted")]
    Stopped,

    /// The queue stayed full for the whole submit timeout
    #[error("timeout submitting job {job_id} after {timeout:?}")]
    SubmitTimeout { job_id: u64, timeout: Duration },

    /// Workers were still running when the stop timeout expired; cleanup may
    /// still be in progress
    #[error("timeout waiting for workers to stop after {timeout:?}")]
    StopTimeout { timeout: Duration },
}

impl ErrorClassification for PoolError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::SubmitTimeout { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ShuttingDown => ErrorSeverity::Info,
            Self::SubmitTimeout { .. } | Self::StopTimeout { .. } => ErrorSeverity::Warning,
            Self::Stopped => ErrorSeverity::Error,
        }
    }
}

/// Pool lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    /// Constructed, workers not yet spawned
    Created,
    /// Workers running
    Running,
    /// Stopped; terminal
    Stopped,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    /// Jobs accepted into the queue
    pub submitted: u64,
    /// Jobs whose handler returned `Ok`
    pub completed: u64,
    /// Jobs whose handler returned `Err` or that had no handler
    pub failed: u64,
    /// Jobs whose handler panicked
    pub panicked: u64,
    /// Jobs currently executing
    pub active: usize,
    /// Lifecycle state
    pub state: PoolState,
    /// Configured worker count
    pub num_workers: usize,
    /// Configured queue capacity
    pub queue_size: usize,
}

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    active: AtomicUsize,
}

//==============================================================================
// Pool
//==============================================================================

type JobSender<P, R, E> = mpsc::Sender<Job<P, R, E>>;
type SharedJobReceiver<P, R, E> = Arc<AsyncMutex<mpsc::Receiver<Job<P, R, E>>>>;

/// Fixed number of workers pulling from a bounded queue
pub struct WorkerPool<P, R, E> {
    config: WorkerPoolConfig,
    ctx: Context,
    /// Ends when the pool stops accepting jobs; a child of `ctx`
    admission: Context,
    state: Mutex<PoolState>,
    job_tx: Mutex<Option<JobSender<P, R, E>>>,
    job_rx: SharedJobReceiver<P, R, E>,
    result_tx: Mutex<Option<mpsc::Sender<JobResult<R, E>>>>,
    result_rx: Mutex<Option<mpsc::Receiver<JobResult<R, E>>>>,
    tracker: TaskTracker,
    counters: Arc<PoolCounters>,
}

impl<P, R, E> fmt::Debug for WorkerPool<P, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .field("running_workers", &self.tracker.len())
            .finish()
    }
}

impl<P, R, E> WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    /// Create a pool; zero values fall back to 1 worker and a queue of 100
    pub fn new(num_workers: usize, queue_size: usize) -> Self {
        Self::from_config(WorkerPoolConfig { num_workers, queue_size })
    }

    /// Create a pool from configuration
    pub fn from_config(config: WorkerPoolConfig) -> Self {
        let config = config.normalized();
        let (job_tx, job_rx) = mpsc::channel(config.queue_size);
        let (result_tx, result_rx) = mpsc::channel(config.queue_size);

        let ctx = Context::background();
        let admission = ctx.child();

        Self {
            config,
            ctx,
            admission,
            state: Mutex::new(PoolState::Created),
            job_tx: Mutex::new(Some(job_tx)),
            job_rx: Arc::new(AsyncMutex::new(job_rx)),
            result_tx: Mutex::new(Some(result_tx)),
            result_rx: Mutex::new(Some(result_rx)),
            tracker: TaskTracker::new(),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Spawn the workers.
    ///
    /// Calling `start` on a running pool is a no-op; calling it after the
    /// pool stopped returns [`PoolError::Stopped`]. Must be called from
    /// within a tokio runtime.
    pub fn start(&self) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        match *state {
            PoolState::Running => return Ok(()),
            PoolState::Stopped => return Err(PoolError::Stopped),
            PoolState::Created => {}
        }

        let Some(result_tx) = self.result_tx.lock().take() else {
            return Err(PoolError::Stopped);
        };

        for i in 0..self.config.num_workers {
            let worker_id = i;
            let worker_ctx = self.ctx.clone();
            let job_rx = Arc::clone(&self.job_rx);
            let result_tx = result_tx.clone();
            let counters = Arc::clone(&self.counters);
            self.tracker.spawn(async move {
                run_worker(worker_id, worker_ctx, job_rx, result_tx, counters).await;
            });
        }

        *state = PoolState::Running;
        info!(
            num_workers = self.config.num_workers,
            queue_size = self.config.queue_size,
            "worker pool started"
        );
        Ok(())
    }

    /// Queue a job, waiting while the queue is full.
    ///
    /// Jobs submitted before `start` are buffered and run once workers spawn.
    #[instrument(skip(self, job), fields(job_id = job.id))]
    pub async fn submit(&self, job: Job<P, R, E>) -> Result<(), PoolError> {
        let sender = self.sender()?;

        tokio::select! {
            biased;
            _ = self.admission.done() => Err(PoolError::ShuttingDown),
            sent = sender.send(job) => {
                sent.map_err(|_| PoolError::ShuttingDown)?;
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// [`submit`](Self::submit) bounded by `timeout`
    pub async fn submit_with_timeout(
        &self,
        job: Job<P, R, E>,
        timeout: Duration,
    ) -> Result<(), PoolError> {
        let job_id = job.id;
        match tokio::time::timeout(timeout, self.submit(job)).await {
            Ok(submitted) => submitted,
            Err(_) => {
                debug!(job_id, ?timeout, "job submission timed out");
                Err(PoolError::SubmitTimeout { job_id, timeout })
            }
        }
    }

    fn sender(&self) -> Result<JobSender<P, R, E>, PoolError> {
        if self.admission.is_done() {
            return Err(PoolError::ShuttingDown);
        }
        self.job_tx.lock().clone().ok_or(PoolError::ShuttingDown)
    }

    /// Hand out the results receiver; `None` after the first call.
    ///
    /// The channel closes once every worker has exited after a stop.
    pub fn take_results(&self) -> Option<mpsc::Receiver<JobResult<R, E>>> {
        self.result_rx.lock().take()
    }

    /// Cancel the workers, close the queue and wait for every worker to exit.
    ///
    /// Queued jobs that no worker picked up are dropped. Handlers that ignore
    /// `ctx.done()` run to completion before this returns.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.begin_stop(true);
        self.tracker.wait().await;
        info!("worker pool stopped");
    }

    /// [`stop`](Self::stop) bounded by `timeout`
    #[instrument(skip(self))]
    pub async fn stop_with_timeout(&self, timeout: Duration) -> Result<(), PoolError> {
        self.begin_stop(true);
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("worker pool stopped");
                Ok(())
            }
            Err(_) => {
                warn!(?timeout, running = self.tracker.len(), "worker pool stop timed out");
                Err(PoolError::StopTimeout { timeout })
            }
        }
    }

    /// Close the queue and let workers finish every queued job, then stop.
    ///
    /// If the drain does not finish within `timeout` the workers are cancelled
    /// and [`PoolError::StopTimeout`] is returned.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), PoolError> {
        self.begin_stop(false);
        let drained = tokio::time::timeout(timeout, self.tracker.wait()).await;
        self.ctx.cancel();

        match drained {
            Ok(()) => {
                info!("worker pool drained and stopped");
                Ok(())
            }
            Err(_) => {
                warn!(?timeout, running = self.tracker.len(), "worker pool drain timed out");
                Err(PoolError::StopTimeout { timeout })
            }
        }
    }

    fn begin_stop(&self, cancel: bool) {
        let previous = std::mem::replace(&mut *self.state.lock(), PoolState::Stopped);
        self.admission.cancel();
        if cancel {
            self.ctx.cancel();
        }
        if previous == PoolState::Created {
            let queued = self.counters.submitted.load(Ordering::Relaxed);
            if queued > 0 {
                warn!(queued, "worker pool stopped before start; dropping queued jobs");
            }
        }
        // Dropping the pool's senders closes the queue; the results channel
        // closes when the last worker drops its clone.
        self.job_tx.lock().take();
        self.result_tx.lock().take();
        self.tracker.close();
        debug!(%previous, cancel, "worker pool stopping");
    }

    /// Current lifecycle state
    pub fn state(&self) -> PoolState {
        *self.state.lock()
    }

    /// Effective configuration
    pub fn config(&self) -> WorkerPoolConfig {
        self.config
    }

    /// Snapshot of the pool counters
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed),
            state: self.state(),
            num_workers: self.config.num_workers,
            queue_size: self.config.queue_size,
        }
    }
}

impl<P, R, E> Drop for WorkerPool<P, R, E> {
    fn drop(&mut self) {
        if *self.state.get_mut() == PoolState::Running {
            warn!("WorkerPool dropped while running; cancelling workers");
            self.ctx.cancel();
        }
    }
}

async fn run_worker<P, R, E>(
    worker_id: usize,
    ctx: Context,
    job_rx: SharedJobReceiver<P, R, E>,
    result_tx: mpsc::Sender<JobResult<R, E>>,
    counters: Arc<PoolCounters>,
) where
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    debug!(worker_id, "worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.done() => None,
            job = async { job_rx.lock().await.recv().await } => job,
        };
        let Some(job) = next else {
            break;
        };

        let result = execute_job(worker_id, &ctx, job, &counters).await;

        tokio::select! {
            biased;
            _ = ctx.done() => break,
            sent = result_tx.send(result) => {
                if sent.is_err() {
                    debug!(worker_id, "results receiver dropped; discarding result");
                }
            }
        }
    }

    debug!(worker_id, "worker exiting");
}

async fn execute_job<P, R, E>(
    worker_id: usize,
    ctx: &Context,
    job: Job<P, R, E>,
    counters: &PoolCounters,
) -> JobResult<R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    let Job { id: job_id, payload, handler } = job;
    let started = Instant::now();
    counters.active.fetch_add(1, Ordering::Relaxed);

    let outcome = match handler {
        Some(handler) => {
            let job_ctx = ctx.clone();
            match AssertUnwindSafe(async move { handler(job_ctx, payload).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(JobError::Failed(error)),
                Err(panic) => {
                    let message = panic_message(panic);
                    warn!(worker_id, job_id, panic = %message, "job handler panicked");
                    Err(JobError::Panicked { job_id, message })
                }
            }
        }
        None => {
            warn!(worker_id, job_id, "job submitted without a handler");
            Err(JobError::MissingHandler { job_id })
        }
    };

    counters.active.fetch_sub(1, Ordering::Relaxed);
    let counter = match &outcome {
        Ok(_) => &counters.completed,
        Err(JobError::Panicked { .. }) => &counters.panicked,
        Err(_) => &counters.failed,
    };
    counter.fetch_add(1, Ordering::Relaxed);

    JobResult { job_id, outcome, duration: started.elapsed(), worker_id }
}

#[cfg(test)]
mod tests {
    //! Unit tests for workers::pool.

    use std::collections::HashSet;

    use conflux_common::testing::poll_until;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    #[error("handler failed: {0}")]
    struct HandlerError(String);

    type TestPool = WorkerPool<u64, u64, HandlerError>;

    fn doubling_job(id: u64) -> Job<u64, u64, HandlerError> {
        Job::new(id, id, |_ctx, n: u64| async move { Ok(n * 2) })
    }

    async fn collect(
        results: &mut mpsc::Receiver<JobResult<u64, HandlerError>>,
        count: usize,
    ) -> Vec<JobResult<u64, HandlerError>> {
        let mut collected = Vec::with_capacity(count);
        for _ in 0..count {
            let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
                .await
                .expect("result should arrive")
                .expect("results channel should be open");
            collected.push(result);
        }
        collected
    }

    /// Validates `WorkerPool::new` normalisation of zero sizes.
    ///
    /// Assertions:
    /// - Confirms 0 workers becomes 1 and queue 0 becomes 100.
    #[test]
    fn test_zero_sizes_normalized() {
        let pool = TestPool::new(0, 0);
        assert_eq!(pool.config(), WorkerPoolConfig { num_workers: 1, queue_size: 100 });
        assert_eq!(pool.state(), PoolState::Created);
    }

    /// Validates the doubling scenario with three workers.
    ///
    /// Assertions:
    /// - Confirms five doubling jobs produce outputs `{0, 2, 4, 6, 8}`.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_doubling_jobs_produce_expected_outputs() {
        let pool = TestPool::new(3, 10);
        let mut results = pool.take_results().unwrap();
        pool.start().unwrap();

        for id in 0..5 {
            pool.submit(doubling_job(id)).await.unwrap();
        }

        let outputs: HashSet<u64> = collect(&mut results, 5)
            .await
            .into_iter()
            .map(|result| result.outcome.unwrap())
            .collect();
        assert_eq!(outputs, HashSet::from([0, 2, 4, 6, 8]));

        pool.stop().await;
    }

    /// Validates exactly-once delivery of results.
    ///
    /// Assertions:
    /// - Confirms `M` submitted jobs yield `M` distinct job ids.
    /// - Confirms the results channel closes after `stop`.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_every_job_yields_one_result() {
        let pool = TestPool::new(4, 64);
        let mut results = pool.take_results().unwrap();
        pool.start().unwrap();

        for id in 0..50 {
            pool.submit(Job::new(id, id, |_ctx, n: u64| async move { Ok(n) })).await.unwrap();
        }

        let ids: HashSet<u64> =
            collect(&mut results, 50).await.into_iter().map(|result| result.job_id).collect();
        assert_eq!(ids.len(), 50);

        pool.stop().await;
        assert!(results.recv().await.is_none());
        assert_eq!(pool.metrics().completed, 50);
    }

    /// Validates panic recovery inside a worker.
    ///
    /// Assertions:
    /// - Confirms the panic surfaces as `JobError::Panicked` with the job id.
    /// - Confirms the worker keeps serving subsequent jobs.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_job_is_recovered() {
        let pool = TestPool::new(1, 4);
        let mut results = pool.take_results().unwrap();
        pool.start().unwrap();

        pool.submit(Job::new(7, 0, |_ctx, n: u64| async move {
            if n == 0 {
                panic!("division by zero");
            }
            Ok(n)
        }))
        .await
        .unwrap();
        pool.submit(doubling_job(8)).await.unwrap();

        let collected = collect(&mut results, 2).await;
        let panicked = collected.iter().find(|result| result.job_id == 7).unwrap();
        match &panicked.outcome {
            Err(err @ JobError::Panicked { job_id: 7, .. }) => {
                assert_eq!(err.to_string(), "panic in job 7: division by zero");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let survivor = collected.iter().find(|result| result.job_id == 8).unwrap();
        assert_eq!(survivor.outcome.as_ref().unwrap(), &16);
        assert_eq!(pool.metrics().panicked, 1);

        pool.stop().await;
    }

    /// Validates `Job::without_handler` for the missing handler scenario.
    ///
    /// Assertions:
    /// - Confirms the result is `JobError::MissingHandler` rather than a crash.
    /// - Confirms handler errors are passed through as `JobError::Failed`.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_handler_and_failed_handler() {
        let pool = TestPool::new(2, 4);
        let mut results = pool.take_results().unwrap();
        pool.start().unwrap();

        pool.submit(Job::without_handler(1, 1)).await.unwrap();
        pool.submit(Job::new(2, 2, |_ctx, _n: u64| async move {
            Err(HandlerError("bad payload".to_string()))
        }))
        .await
        .unwrap();

        let collected = collect(&mut results, 2).await;
        for result in collected {
            match result.job_id {
                1 => assert_eq!(result.outcome.unwrap_err(), JobError::MissingHandler { job_id: 1 }),
                2 => assert_eq!(
                    result.outcome.unwrap_err(),
                    JobError::Failed(HandlerError("bad payload".to_string()))
                ),
                other => panic!("unexpected job id {other}"),
            }
        }
        assert_eq!(pool.metrics().failed, 2);

        pool.stop().await;
    }

    /// Validates lifecycle transitions around `stop`.
    ///
    /// Assertions:
    /// - Ensures `start` is idempotent while running.
    /// - Ensures submits after stop return `ShuttingDown`.
    /// - Ensures restarting a stopped pool returns `Stopped`.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_lifecycle_after_stop() {
        let pool = TestPool::new(2, 4);
        pool.start().unwrap();
        pool.start().unwrap();
        assert_eq!(pool.state(), PoolState::Running);

        pool.stop().await;
        assert_eq!(pool.state(), PoolState::Stopped);
        assert_eq!(pool.submit(doubling_job(1)).await, Err(PoolError::ShuttingDown));
        assert_eq!(pool.start(), Err(PoolError::Stopped));
    }

    /// Validates `submit_with_timeout` for the full queue scenario.
    ///
    /// Assertions:
    /// - Confirms a blocked submit fails with `SubmitTimeout` naming the job.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_submit_with_timeout_on_full_queue() {
        let pool = TestPool::new(1, 1);
        pool.submit(doubling_job(1)).await.unwrap();

        let err = pool
            .submit_with_timeout(doubling_job(2), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, PoolError::SubmitTimeout { job_id: 2, timeout: Duration::from_millis(20) });
    }

    /// Validates `stop_with_timeout` when a handler ignores cancellation.
    ///
    /// Assertions:
    /// - Confirms `StopTimeout` is reported while the handler still runs.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_with_timeout_reports_stragglers() {
        let pool = TestPool::new(1, 4);
        pool.start().unwrap();
        pool.submit(Job::new(1, 1, |_ctx, n: u64| async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(n)
        }))
        .await
        .unwrap();

        let started = poll_until(Duration::from_secs(1), Duration::from_millis(2), || {
            let pool = &pool;
            async move { pool.metrics().active == 1 }
        })
        .await;
        assert!(started, "job should be running");
        let err = pool.stop_with_timeout(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, PoolError::StopTimeout { timeout: Duration::from_millis(20) });
    }

    /// Validates `shutdown` closing admission before the drain.
    ///
    /// Assertions:
    /// - Confirms a submit blocked on a full queue returns `ShuttingDown`
    ///   once the drain starts.
    /// - Confirms only the jobs accepted before shutdown produce results.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_rejects_blocked_submit() {
        let pool = Arc::new(TestPool::new(1, 1));
        let mut results = pool.take_results().unwrap();
        pool.start().unwrap();

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        pool.submit(Job::new(1, 1, |_ctx, n: u64| async move {
            let _ = release_rx.await;
            Ok(n)
        }))
        .await
        .unwrap();
        let started = poll_until(Duration::from_secs(1), Duration::from_millis(2), || {
            let pool = Arc::clone(&pool);
            async move { pool.metrics().active == 1 }
        })
        .await;
        assert!(started, "first job should be running");
        pool.submit(doubling_job(2)).await.unwrap();

        let blocked = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.submit(doubling_job(3)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished(), "queue is full, submit should wait");

        let drain = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.shutdown(Duration::from_secs(5)).await })
        };
        let rejected =
            tokio::time::timeout(Duration::from_secs(1), blocked).await.unwrap().unwrap();
        assert_eq!(rejected, Err(PoolError::ShuttingDown));

        release_tx.send(()).unwrap();
        let mut ids = HashSet::new();
        while let Some(result) = results.recv().await {
            ids.insert(result.job_id);
        }
        drain.await.unwrap().unwrap();
        assert_eq!(ids, HashSet::from([1, 2]));
        assert_eq!(pool.metrics().submitted, 2);
    }

    /// Validates `shutdown` on a pool that never started.
    ///
    /// Assertions:
    /// - Confirms the call succeeds and the pool is stopped.
    /// - Confirms the buffered jobs produce no results.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_before_start_drops_buffered_jobs() {
        let pool = TestPool::new(2, 8);
        let mut results = pool.take_results().unwrap();
        for id in 0..3 {
            pool.submit(doubling_job(id)).await.unwrap();
        }

        pool.shutdown(Duration::from_millis(100)).await.unwrap();
        assert_eq!(pool.state(), PoolState::Stopped);
        assert_eq!(pool.metrics().submitted, 3);
        assert!(results.recv().await.is_none());
        assert_eq!(pool.submit(doubling_job(9)).await, Err(PoolError::ShuttingDown));
    }

    /// Validates `shutdown` draining queued work.
    ///
    /// Assertions:
    /// - Confirms jobs queued before start are all processed by the drain.
    /// - Confirms the results channel then closes.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_drains_queue() {
        let pool = TestPool::new(2, 16);
        let mut results = pool.take_results().unwrap();
        for id in 0..10 {
            pool.submit(doubling_job(id)).await.unwrap();
        }
        pool.start().unwrap();

        pool.shutdown(Duration::from_secs(5)).await.unwrap();

        let mut count = 0;
        while let Some(result) = results.recv().await {
            assert!(result.is_ok());
            count += 1;
        }
        assert_eq!(count, 10);
        assert_eq!(pool.metrics().submitted, 10);
    }

    /// Validates the worker concurrency bound.
    ///
    /// Assertions:
    /// - Ensures no more than `num_workers` handlers run at once.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounded_by_workers() {
        let pool = TestPool::new(2, 32);
        let mut results = pool.take_results().unwrap();
        pool.start().unwrap();

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for id in 0..12 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(Job::new(id, id, move |_ctx, n: u64| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(n)
            }))
            .await
            .unwrap();
        }

        collect(&mut results, 12).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        pool.stop().await;
    }

    /// Validates `take_results` hands out the receiver once.
    #[test]
    fn test_take_results_once() {
        let pool = TestPool::new(1, 1);
        assert!(pool.take_results().is_some());
        assert!(pool.take_results().is_none());
    }
}
