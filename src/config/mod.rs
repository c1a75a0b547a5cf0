//! Runtime configuration.
//!
//! Loaded in layers with increasing priority: built-in defaults, an
//! optional TOML file, then `BLOCKFLOW_`-prefixed environment variables.

#[cfg(test)]
mod config_test;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;

use crate::errors::Error;
use crate::errors::Result;

/// Backoff used when retrying worker-pool submissions that were rejected
/// because a lane queue was full.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of retries before the submission is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Number of worker lanes evaluating dependants concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Queue slots per worker lane.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Retry policy for full-queue submissions.
    #[serde(default)]
    pub evaluation_retry: BackoffPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            evaluation_retry: BackoffPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration with priority:
    /// 1. Defaults
    /// 2. Optional config file
    /// 3. Environment variables (highest priority)
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = Config::builder();

        if let Some(path) = path {
            config = config.add_source(File::with_name(path).required(true));
        }

        config = config.add_source(
            Environment::with_prefix("BLOCKFLOW")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let loaded: RuntimeConfig = config.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Fatal("workers must be greater than zero".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Fatal("queue_capacity must be greater than zero".into()));
        }
        if self.evaluation_retry.base_delay_ms > self.evaluation_retry.max_delay_ms {
            return Err(Error::Fatal(
                "evaluation_retry.base_delay_ms must not exceed max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_retries() -> usize {
    10
}

fn default_base_delay_ms() -> u64 {
    1
}

fn default_max_delay_ms() -> u64 {
    10_000
}
