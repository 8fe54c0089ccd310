//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if a variable is set but malformed.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Delay between ticks.
    pub interval: Duration,
    /// Maximum concurrently forwarded tasks. 0 means unbounded.
    pub admission_budget: usize,
    /// Worker pool size. 0 means unbounded.
    pub workers: usize,
    /// How long `stop` waits for the ticker and then for the pool.
    pub shutdown_timeout: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            admission_budget: 0,
            workers: 4,
            shutdown_timeout: Duration::from_millis(5000),
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// [`Config::default`] for anything unset.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let interval_ms = optional_var("POLLQ_INTERVAL_MS")?
            .unwrap_or(defaults.interval.as_millis() as u64);
        if interval_ms == 0 {
            return Err(Error::Config(
                "POLLQ_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }
        let shutdown_ms = optional_var("POLLQ_SHUTDOWN_TIMEOUT_MS")?
            .unwrap_or(defaults.shutdown_timeout.as_millis() as u64);

        Ok(Self {
            interval: Duration::from_millis(interval_ms),
            admission_budget: optional_var("POLLQ_ADMISSION_BUDGET")?
                .unwrap_or(defaults.admission_budget),
            workers: optional_var("POLLQ_WORKERS")?.unwrap_or(defaults.workers),
            shutdown_timeout: Duration::from_millis(shutdown_ms),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

fn optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid value for {name} ({raw:?}): {e}"))),
        Err(_) => Ok(None),
    }
}
