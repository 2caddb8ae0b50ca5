//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on malformed values. Queue-level
//! configuration lives in [`queues`].

pub mod queues;

pub use queues::{DEFAULT_CONCURRENCY, QueueConfig, QueueDefinitions, QueueOptions};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub default_concurrency: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            otel_endpoint: std::env::var("TASKQ_OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            default_concurrency: concurrency_var("TASKQ_DEFAULT_CONCURRENCY")?
                .unwrap_or(DEFAULT_CONCURRENCY),
        })
    }

    /// The queue defaults this config implies.
    pub fn queue_defaults(&self) -> QueueConfig {
        QueueConfig::with_concurrency(self.default_concurrency)
    }
}

fn concurrency_var(name: &str) -> Result<Option<usize>> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(Some(n)),
        _ => Err(Error::Config(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}
