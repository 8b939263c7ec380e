//! Aggregate configuration for a Conflux deployment
//!
//! Loaded from TOML, then optionally overridden by `CONFLUX_*` environment
//! variables. Every section falls back to its defaults when omitted.
//!
//! ```toml
//! [pool]
//! num_workers = 8
//! queue_size = 256
//!
//! [client.circuit_breaker]
//! failure_threshold = 5
//! timeout = 30000
//!
//! [logging]
//! level = "conflux_core=debug"
//! format = "json"
//! ```

use std::path::Path;

use conflux_common::{CommonError, CommonResult, LogFormat, LoggingConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::resilience::ResilientClientConfig;
use crate::workers::{FanOutConfig, WorkerPoolConfig};

const ENV_POOL_WORKERS: &str = "CONFLUX_POOL_WORKERS";
const ENV_POOL_QUEUE_SIZE: &str = "CONFLUX_POOL_QUEUE_SIZE";
const ENV_LOG_LEVEL: &str = "CONFLUX_LOG_LEVEL";
const ENV_LOG_JSON: &str = "CONFLUX_LOG_JSON";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluxConfig {
    pub pool: WorkerPoolConfig,
    pub fan_out: FanOutConfig,
    pub client: ResilientClientConfig,
    pub logging: LoggingConfig,
}

impl ConfluxConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> CommonResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> CommonResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CommonError::persistence_op("read config", format!("{}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&source)?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// [`from_file`](Self::from_file) followed by process environment
    /// overrides
    pub fn load(path: impl AsRef<Path>) -> CommonResult<Self> {
        Self::from_file(path)?.with_env_overrides()
    }

    /// Apply `CONFLUX_*` overrides from the process environment
    pub fn with_env_overrides(self) -> CommonResult<Self> {
        self.with_overrides(std::env::vars())
    }

    /// Apply `CONFLUX_*` overrides from `vars`, then re-validate.
    ///
    /// Unrelated keys are ignored. Malformed values are reported with the
    /// offending variable as the field.
    pub fn with_overrides<I, K, V>(mut self, vars: I) -> CommonResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                ENV_POOL_WORKERS => self.pool.num_workers = parse_usize(key, value)?,
                ENV_POOL_QUEUE_SIZE => self.pool.queue_size = parse_usize(key, value)?,
                ENV_LOG_LEVEL => self.logging.level = value.to_string(),
                ENV_LOG_JSON => {
                    self.logging.format = if parse_bool(key, value)? {
                        LogFormat::Json
                    } else {
                        LogFormat::Compact
                    };
                }
                _ => continue,
            }
            debug!(variable = key, "applied environment override");
        }

        self.validate()?;
        Ok(self)
    }

    /// Check every section
    pub fn validate(&self) -> CommonResult<()> {
        if self.pool.num_workers == 0 {
            return Err(CommonError::config_field("pool.num_workers", "must be greater than 0"));
        }
        if self.pool.queue_size == 0 {
            return Err(CommonError::config_field("pool.queue_size", "must be greater than 0"));
        }
        if self.fan_out.num_workers == 0 {
            return Err(CommonError::config_field("fan_out.num_workers", "must be greater than 0"));
        }
        self.client
            .circuit_breaker
            .validate()
            .map_err(|e| CommonError::config_field("client.circuit_breaker", e.to_string()))?;
        self.client
            .retry
            .validate()
            .map_err(|e| CommonError::config_field("client.retry", e.to_string()))?;
        if let Some(bucket) = &self.client.rate_limit {
            if !(bucket.capacity.is_finite() && bucket.capacity > 0.0)
                || !(bucket.refill_per_second.is_finite() && bucket.refill_per_second > 0.0)
            {
                return Err(CommonError::config_field(
                    "client.rate_limit",
                    "capacity and refill_per_second must be positive",
                ));
            }
        }
        self.logging
            .env_filter()
            .map_err(|e| CommonError::config_field("logging.level", e.to_string()))?;
        Ok(())
    }

    /// Render as pretty TOML
    pub fn to_toml_string(&self) -> CommonResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn parse_usize(key: &str, value: &str) -> CommonResult<usize> {
    value
        .parse()
        .map_err(|_| CommonError::config_field(key, format!("expected a whole number, got '{value}'")))
}

fn parse_bool(key: &str, value: &str) -> CommonResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CommonError::config_field(key, format!("expected a boolean, got '{value}'"))),
    }
}
