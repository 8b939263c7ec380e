//! Observability setup
//!
//! Conflux libraries only emit `tracing` events; installing a subscriber is
//! the application's choice. [`init_tracing`] wires up the conventional
//! stack (an `EnvFilter` plus a fmt layer) from a serde-loadable
//! [`LoggingConfig`].

pub mod logging;

pub use logging::{init_tracing, LogFormat, LoggingConfig, ObservabilityError};
