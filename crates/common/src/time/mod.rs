//! Time abstractions
//!
//! The [`Clock`] trait lets time-driven state machines (circuit breakers,
//! rate limiters) run against real monotonic time in production and against
//! a [`MockClock`] in tests, so timeout behavior can be exercised without
//! sleeping.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use conflux_common::time::{Clock, MockClock};
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//! clock.advance(Duration::from_secs(5));
//! assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));
//! ```

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};
