//! Counting semaphore
//!
//! Unlike [`tokio::sync::Semaphore`], slots are not tied to a permit value:
//! callers `acquire` and later `release` explicitly, as with a Go buffered
//! channel. [`SemaphoreGuard`] restores RAII release for scoped use.

use conflux_common::{ErrorClassification, ErrorSeverity};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::context::{Context, ContextError};

/// Semaphore misuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SemaphoreError {
    /// `release` was called with no slot held
    #[error("semaphore: release without acquire")]
    ReleaseWithoutAcquire,
}

impl ErrorClassification for SemaphoreError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Critical
    }
}

/// Bounded counting semaphore
///
/// `available() + held() == capacity()` holds at every observation.
#[derive(Debug)]
pub struct Semaphore {
    permits: tokio::sync::Semaphore,
    capacity: usize,
    release_lock: Mutex<()>,
}

impl Semaphore {
    /// Create a semaphore with `capacity` slots (clamped to at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { permits: tokio::sync::Semaphore::new(capacity), capacity, release_lock: Mutex::new(()) }
    }

    /// Wait for a free slot.
    ///
    /// Returns the context error if `ctx` is cancelled or expires first; no
    /// slot is held in that case.
    #[instrument(skip(self, ctx), fields(capacity = self.capacity))]
    pub async fn acquire(&self, ctx: &Context) -> Result<(), ContextError> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        tokio::select! {
            biased;
            err = ctx.done() => {
                debug!(error = %err, "semaphore acquire abandoned");
                Err(err)
            }
            permit = self.permits.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    Ok(())
                }
                // The inner semaphore is never closed
                Err(_) => Err(ContextError::Canceled),
            },
        }
    }

    /// Take a slot if one is free, without waiting
    pub fn try_acquire(&self) -> bool {
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Return a slot.
    ///
    /// Releasing more slots than were acquired is a programming error; it is
    /// logged and reported without changing the count.
    pub fn release(&self) -> Result<(), SemaphoreError> {
        let _serialised = self.release_lock.lock();
        if self.permits.available_permits() >= self.capacity {
            error!(capacity = self.capacity, "semaphore released without a matching acquire");
            return Err(SemaphoreError::ReleaseWithoutAcquire);
        }
        self.permits.add_permits(1);
        Ok(())
    }

    /// Acquire a slot that is released when the guard drops
    pub async fn acquire_guard(&self, ctx: &Context) -> Result<SemaphoreGuard<'_>, ContextError> {
        self.acquire(ctx).await?;
        Ok(SemaphoreGuard { semaphore: self })
    }

    /// Non-blocking variant of [`acquire_guard`](Self::acquire_guard)
    pub fn try_acquire_guard(&self) -> Option<SemaphoreGuard<'_>> {
        self.try_acquire().then(|| SemaphoreGuard { semaphore: self })
    }

    /// Free slots
    pub fn available(&self) -> usize {
        self.permits.available_permits().min(self.capacity)
    }

    /// Slots currently held
    pub fn held(&self) -> usize {
        self.capacity - self.available()
    }

    /// Total slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Holds one semaphore slot until dropped
#[derive(Debug)]
#[must_use = "the slot is released as soon as the guard is dropped"]
pub struct SemaphoreGuard<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        // The guard owns exactly one acquired slot
        let _ = self.semaphore.release();
    }
}
