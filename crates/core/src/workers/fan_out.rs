//! Fan-out/fan-in batch processing
//!
//! [`FanOutFanIn::process`] spreads a batch over a fixed number of workers
//! and returns one [`ProcessResult`] per input item. Items that were never
//! handed to a worker because the context ended are still reported, as
//! [`ProcessError::Canceled`], so callers can always account for the whole
//! batch.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conflux_common::{ErrorClassification, ErrorSeverity};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};

use crate::context::{Context, ContextError};
use crate::panic::panic_message;

/// Type-erased item processor.
///
/// Cancellation is cooperative: once the context ends no *new* items are
/// handed out, but an invocation already running only stops early if it
/// observes `ctx.done()` itself.
pub type ProcessFn<In, Out, E> =
    Arc<dyn Fn(Context, In) -> BoxFuture<'static, Result<Out, E>> + Send + Sync + 'static>;

/// Why an item produced no output
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError<E> {
    /// The processor returned an error
    #[error("{0}")]
    Failed(E),

    /// The processor panicked
    #[error("panic during processing: {message}")]
    Panicked { message: String },

    /// The item was never processed because the context ended
    #[error("{0}")]
    Canceled(ContextError),
}

impl<E: ErrorClassification> ErrorClassification for ProcessError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Failed(error) => error.is_retryable(),
            Self::Panicked { .. } | Self::Canceled(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Failed(error) => error.severity(),
            Self::Panicked { .. } => ErrorSeverity::Critical,
            Self::Canceled(error) => error.severity(),
        }
    }
}

/// Outcome for one input item
#[derive(Debug, Clone)]
pub struct ProcessResult<In, Out, E> {
    /// Position of the item in the input batch
    pub index: usize,
    /// The input item
    pub input: In,
    /// Processor output or the reason it is missing
    pub outcome: Result<Out, ProcessError<E>>,
    /// Time spent in the processor (zero for unprocessed items)
    pub duration: Duration,
}

/// Configuration for [`FanOutFanIn`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    pub num_workers: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self { num_workers: 4 }
    }
}

/// Processes batches with a fixed number of concurrent workers
#[derive(Debug, Clone, Copy)]
pub struct FanOutFanIn {
    num_workers: usize,
}

impl FanOutFanIn {
    /// Create a processor with `num_workers` workers (clamped to at least 1)
    pub fn new(num_workers: usize) -> Self {
        Self { num_workers: num_workers.max(1) }
    }

    pub fn from_config(config: &FanOutConfig) -> Self {
        Self::new(config.num_workers)
    }

    /// Configured worker count
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Process every item, returning results in completion order.
    ///
    /// Items left unprocessed because `ctx` ended are appended last, in input
    /// order, with [`ProcessError::Canceled`].
    #[instrument(skip(self, ctx, items, processor), fields(items = items.len(), workers = self.num_workers))]
    pub async fn process<In, Out, E, F, Fut>(
        &self,
        ctx: &Context,
        items: Vec<In>,
        processor: F,
    ) -> Vec<ProcessResult<In, Out, E>>
    where
        In: Clone + Send + 'static,
        Out: Send + 'static,
        E: Send + 'static,
        F: Fn(Context, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let processor: ProcessFn<In, Out, E> =
            Arc::new(move |ctx: Context, input: In| processor(ctx, input).boxed());
        let (item_tx, item_rx) = mpsc::channel::<(usize, In)>(self.num_workers);
        let item_rx = Arc::new(AsyncMutex::new(item_rx));
        let (result_tx, mut result_rx) = mpsc::channel(total);
        let tracker = TaskTracker::new();

        for i in 0..self.num_workers {
            let worker_id = i;
            let worker_ctx = ctx.clone();
            let item_rx = Arc::clone(&item_rx);
            let result_tx = result_tx.clone();
            let processor = Arc::clone(&processor);
            tracker.spawn(async move {
                fan_out_worker(worker_id, worker_ctx, item_rx, result_tx, processor).await;
            });
        }
        tracker.close();
        drop(result_tx);

        let mut unprocessed = Vec::new();
        let mut pending = items.into_iter().enumerate();
        while let Some((index, item)) = pending.next() {
            tokio::select! {
                biased;
                _ = ctx.done() => {
                    unprocessed.push((index, item));
                    unprocessed.extend(pending.by_ref());
                    break;
                }
                permit = item_tx.reserve() => match permit {
                    Ok(permit) => permit.send((index, item)),
                    Err(_) => {
                        unprocessed.push((index, item));
                        unprocessed.extend(pending.by_ref());
                        break;
                    }
                },
            }
        }
        drop(item_tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        tracker.wait().await;

        // Workers that stopped on cancellation leave queued items behind
        {
            let mut queue = item_rx.lock().await;
            while let Ok(entry) = queue.try_recv() {
                unprocessed.push(entry);
            }
        }

        if !unprocessed.is_empty() {
            let reason = ctx.err().unwrap_or(ContextError::Canceled);
            debug!(unprocessed = unprocessed.len(), error = %reason, "fan-out stopped early");
            unprocessed.sort_by_key(|(index, _)| *index);
            results.extend(unprocessed.into_iter().map(|(index, input)| ProcessResult {
                index,
                input,
                outcome: Err(ProcessError::Canceled(reason)),
                duration: Duration::ZERO,
            }));
        }

        results
    }

    /// Like [`process`](Self::process) but returns results in input order,
    /// so `results[i].index == i`
    pub async fn process_ordered<In, Out, E, F, Fut>(
        &self,
        ctx: &Context,
        items: Vec<In>,
        processor: F,
    ) -> Vec<ProcessResult<In, Out, E>>
    where
        In: Clone + Send + 'static,
        Out: Send + 'static,
        E: Send + 'static,
        F: Fn(Context, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
    {
        let total = items.len();
        let mut slots: Vec<Option<ProcessResult<In, Out, E>>> =
            std::iter::repeat_with(|| None).take(total).collect();

        for result in self.process(ctx, items, processor).await {
            let index = result.index;
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(result);
            }
        }

        slots.into_iter().flatten().collect()
    }
}

async fn fan_out_worker<In, Out, E>(
    worker_id: usize,
    ctx: Context,
    item_rx: Arc<AsyncMutex<mpsc::Receiver<(usize, In)>>>,
    result_tx: mpsc::Sender<ProcessResult<In, Out, E>>,
    processor: ProcessFn<In, Out, E>,
) where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    E: Send + 'static,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.done() => None,
            item = async { item_rx.lock().await.recv().await } => item,
        };
        let Some((index, input)) = next else {
            break;
        };

        let started = Instant::now();
        let invocation = {
            let processor = Arc::clone(&processor);
            let item_ctx = ctx.clone();
            let item = input.clone();
            async move { processor(item_ctx, item).await }
        };
        let outcome = match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(error)) => Err(ProcessError::Failed(error)),
            Err(panic) => {
                let message = panic_message(panic);
                warn!(worker_id, index, panic = %message, "fan-out processor panicked");
                Err(ProcessError::Panicked { message })
            }
        };

        let result = ProcessResult { index, input, outcome, duration: started.elapsed() };
        // Capacity equals the batch size, so this never waits
        if result_tx.send(result).await.is_err() {
            break;
        }
    }
}
