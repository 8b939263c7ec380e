//! Error-collecting task group
//!
//! [`ErrorGroup`] spawns tasks that share a derived [`Context`] and keeps
//! every failure, not just the first. Panicking tasks are recorded as
//! [`TaskError::Panicked`] instead of tearing down the group.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};

use crate::context::Context;
use crate::panic::panic_message;

/// Failure of one task in the group
#[derive(Debug, Clone, Error)]
pub enum TaskError<E> {
    /// The task returned an error
    #[error("{0}")]
    Failed(E),

    /// The task panicked
    #[error("task panicked: {message}")]
    Panicked { message: String },
}

/// Outcome of [`ErrorGroup::wait`] when at least one task failed
#[derive(Debug, Error)]
pub enum GroupError<E> {
    /// Exactly one task failed
    #[error("{0}")]
    Single(TaskError<E>),
    /// Several tasks failed; all errors are kept in completion order
    #[error("multiple errors: [{}]", join_errors(.0))]
    Multiple(Vec<TaskError<E>>),
}

fn join_errors<T: fmt::Display>(errors: &[T]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}

impl<E> GroupError<E> {
    /// Every collected error
    pub fn errors(&self) -> &[TaskError<E>] {
        match self {
            Self::Single(error) => std::slice::from_ref(error),
            Self::Multiple(errors) => errors,
        }
    }

    /// Consume into the collected errors
    pub fn into_errors(self) -> Vec<TaskError<E>> {
        match self {
            Self::Single(error) => vec![error],
            Self::Multiple(errors) => errors,
        }
    }
}

/// Spawns tasks under a shared context and aggregates their errors
pub struct ErrorGroup<E> {
    ctx: Context,
    tracker: TaskTracker,
    errors: Arc<Mutex<Vec<TaskError<E>>>>,
    launched: AtomicUsize,
}

impl<E> fmt::Debug for ErrorGroup<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorGroup")
            .field("launched", &self.launched.load(Ordering::Relaxed))
            .field("running", &self.tracker.len())
            .field("errors", &self.errors.lock().len())
            .finish()
    }
}

impl<E: Send + 'static> ErrorGroup<E> {
    /// Create a group whose context is a child of `parent`
    pub fn new(parent: &Context) -> Self {
        Self {
            ctx: parent.child(),
            tracker: TaskTracker::new(),
            errors: Arc::new(Mutex::new(Vec::new())),
            launched: AtomicUsize::new(0),
        }
    }

    /// Launch `f(ctx)`; an error is recorded and siblings keep running
    pub fn go<F, Fut>(&self, f: F)
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.spawn(f, false);
    }

    /// Launch `f(ctx)`; an error also cancels the group context.
    ///
    /// Only siblings that observe `ctx.done()` stop early.
    pub fn go_with_cancel<F, Fut>(&self, f: F)
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.spawn(f, true);
    }

    fn spawn<F, Fut>(&self, f: F, cancel_on_error: bool)
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let task_id = self.launched.fetch_add(1, Ordering::Relaxed);
        let task_ctx = self.ctx.clone();
        let group_ctx = self.ctx.clone();
        let errors = Arc::clone(&self.errors);

        self.tracker.spawn(async move {
            let outcome = AssertUnwindSafe(async move { f(task_ctx).await }).catch_unwind().await;

            let error = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(error)) => TaskError::Failed(error),
                Err(payload) => {
                    let message = panic_message(payload);
                    warn!(task_id, panic = %message, "error group task panicked");
                    TaskError::Panicked { message }
                }
            };

            errors.lock().push(error);
            if cancel_on_error {
                debug!(task_id, "cancelling error group after task failure");
                group_ctx.cancel();
            }
        });
    }

    /// Wait for every launched task and combine their errors
    #[instrument(skip(self), fields(launched = self.len()))]
    pub async fn wait(self) -> Result<(), GroupError<E>> {
        self.tracker.close();
        self.tracker.wait().await;

        let mut errors = std::mem::take(&mut *self.errors.lock());
        match errors.len() {
            0 => Ok(()),
            1 => Err(GroupError::Single(errors.remove(0))),
            count => {
                debug!(count, "error group finished with multiple errors");
                Err(GroupError::Multiple(errors))
            }
        }
    }

    /// The context handed to every task
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Number of tasks launched so far
    pub fn len(&self) -> usize {
        self.launched.load(Ordering::Relaxed)
    }

    /// Whether no task has been launched
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone> ErrorGroup<E> {
    /// Snapshot of the errors collected so far
    pub fn errors(&self) -> Vec<TaskError<E>> {
        self.errors.lock().clone()
    }
}
