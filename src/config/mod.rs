//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast on malformed values. Every variable
//! has a default, so an empty environment yields a working config.

use crate::controller::ControllerConfig;
use crate::error::{Error, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Concurrent worker loops draining the queue.
    pub workers: usize,
    pub cache_sync_timeout: Duration,
    /// Transport timeout for a single fetch.
    pub fetch_timeout: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let workers: usize = optional_var("WORKERS", 1)?;
        if workers == 0 {
            return Err(Error::Config("WORKERS must be at least 1".to_string()));
        }

        Ok(Self {
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            workers,
            cache_sync_timeout: Duration::from_secs(optional_var("CACHE_SYNC_TIMEOUT_SECS", 30)?),
            fetch_timeout: Duration::from_secs(optional_var("FETCH_TIMEOUT_SECS", 30)?),
            retry_base_delay: Duration::from_millis(optional_var("RETRY_BASE_DELAY_MS", 5)?),
            retry_max_delay: Duration::from_secs(optional_var("RETRY_MAX_DELAY_SECS", 1000)?),
        })
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            cache_sync_timeout: self.cache_sync_timeout,
            retry_base_delay: self.retry_base_delay,
            retry_max_delay: self.retry_max_delay,
            ..ControllerConfig::default()
        }
    }
}

fn optional_var<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value {raw:?} for {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
