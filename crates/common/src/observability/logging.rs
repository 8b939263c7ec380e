//! Tracing subscriber initialisation

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Errors raised while installing the global subscriber
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// The configured level is not a valid filter directive
    #[error("invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },

    /// A global subscriber was already installed
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human readable output
    #[default]
    Compact,
    /// Multi-line output for local debugging
    Pretty,
    /// Newline-delimited JSON for log shippers
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `info`,
    /// `conflux_core=debug`)
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Include the event target (module path) in each line
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact, with_target: true }
    }
}

impl LoggingConfig {
    /// Build the filter: `RUST_LOG` wins when set and valid, otherwise the
    /// configured level applies.
    ///
    /// The configured level is always parsed so a bad config file is reported
    /// even on machines that set `RUST_LOG`.
    pub fn env_filter(&self) -> Result<EnvFilter, ObservabilityError> {
        let configured = EnvFilter::try_new(&self.level).map_err(|e| {
            ObservabilityError::InvalidFilter { directive: self.level.clone(), message: e.to_string() }
        })?;
        Ok(EnvFilter::try_from_default_env().unwrap_or(configured))
    }
}

/// Install the global tracing subscriber described by `config`.
///
/// Calling this more than once is harmless: later calls return
/// [`ObservabilityError::AlreadyInitialized`] and leave the first subscriber
/// in place.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ObservabilityError> {
    let filter = config.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(config.with_target))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_target(config.with_target))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(config.with_target))
            .try_init(),
    };

    installed.map_err(|_| ObservabilityError::AlreadyInitialized)?;
    tracing::debug!(level = %config.level, format = ?config.format, "tracing initialised");
    Ok(())
}
