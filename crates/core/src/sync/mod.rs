//! Synchronisation primitives
//!
//! - [`Semaphore`]: counting semaphore with context-aware acquire
//! - [`ErrorGroup`]: spawn a set of tasks and collect every failure

pub mod error_group;
pub mod semaphore;

pub use error_group::{ErrorGroup, GroupError, TaskError};
pub use semaphore::{Semaphore, SemaphoreError, SemaphoreGuard};
