//! Testing utilities and helpers
//!
//! - **[`async_utils`]**: eventually-style assertions and bounded waits for
//!   tests that observe background tasks
//!
//! Time-driven components should be tested with
//! [`MockClock`](crate::time::MockClock) rather than sleeps wherever the
//! component accepts a clock.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use conflux_common::testing::timeout_ok;
//!
//! # tokio_test::block_on(async {
//! let value = timeout_ok(Duration::from_millis(100), async { 7 }).await;
//! assert_eq!(value.ok(), Some(7));
//! # });
//! ```

pub mod async_utils;

// Note: `assert_eventually_async!` is exported at the crate root
pub use async_utils::{poll_until, timeout_ok};
