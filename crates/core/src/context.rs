//! Cancellation context
//!
//! A [`Context`] carries a cancellation signal and an optional deadline down
//! a tree of tasks. Cancelling a context cancels every context derived from
//! it; deriving with a timeout never extends a parent's deadline.
//!
//! Every blocking operation in this crate takes a `&Context` and selects on
//! [`Context::done`], so a caller can bound any call with
//! `ctx.with_timeout(..)` or abort a whole tree with `ctx.cancel()`.

use std::time::Duration;

use conflux_common::{ErrorClassification, ErrorSeverity};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Reason a context is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ContextError {
    /// The context (or one of its ancestors) was cancelled
    #[error("context canceled")]
    Canceled,

    /// The context's deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl ErrorClassification for ContextError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Canceled => ErrorSeverity::Info,
            Self::DeadlineExceeded => ErrorSeverity::Warning,
        }
    }
}

/// Cancellation signal plus optional deadline
///
/// Cloning is cheap and yields a handle to the *same* context; use
/// [`child`](Self::child) to derive a context that can be cancelled
/// independently.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// Root context that is never done unless cancelled
    pub fn background() -> Self {
        Self { token: CancellationToken::new(), deadline: None }
    }

    /// Derive a child that is cancelled with this context but can also be
    /// cancelled on its own
    pub fn child(&self) -> Self {
        Self { token: self.token.child_token(), deadline: self.deadline }
    }

    /// Derive a child whose deadline is `timeout` from now, or the parent's
    /// deadline if that is earlier
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child with the earlier of `deadline` and the parent's deadline
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self { token: self.token.child_token(), deadline: Some(deadline) }
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the context is cancelled or past its deadline
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Why the context is done, or `None` while it is still live
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// The effective deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// The underlying cancellation token.
    ///
    /// The token fires on [`cancel`](Self::cancel) only; deadline expiry is
    /// observed through [`done`](Self::done) and [`err`](Self::err).
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolve once the context is done, yielding the reason.
    ///
    /// Cancel safe: dropping the future has no side effects.
    pub async fn done(&self) -> ContextError {
        if let Some(err) = self.err() {
            return err;
        }
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => ContextError::Canceled,
                    () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }
}
