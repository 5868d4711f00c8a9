use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::broadcast;
use crate::fibonacci::MAX_U64_INPUT;

/// Where the dedicated worker loop sends its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerLoopDelivery {
    /// Post to the UI loop and invoke the dispatch's sink.
    Ui,
    /// Publish on the broadcaster; the sink is not used.
    Broadcast,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("fibonacci_input {0} overflows u64 (expected <= {})", MAX_U64_INPUT)]
    FibonacciOverflow(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub pool_size: usize,
    pub worker_loop_name: String,
    pub broadcast_action: String,
    pub broadcast_capacity: usize,
    pub worker_loop_delivery: WorkerLoopDelivery,
    pub join_on_teardown: bool,
    pub runtime_threads: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
    pub fibonacci_input: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            worker_loop_name: "worker-loop".to_string(),
            broadcast_action: "image.downloaded".to_string(),
            broadcast_capacity: broadcast::DEFAULT_CAPACITY,
            worker_loop_delivery: WorkerLoopDelivery::Ui,
            join_on_teardown: true,
            runtime_threads: 2,
            shutdown_grace: Duration::from_millis(500),
            fibonacci_input: 40,
        }
    }
}

const ENV_POOL_SIZE: &str = "ASYNC_WARS_POOL_SIZE";
const ENV_JOIN_ON_TEARDOWN: &str = "ASYNC_WARS_JOIN_ON_TEARDOWN";
const ENV_FIBONACCI_INPUT: &str = "ASYNC_WARS_FIBONACCI_INPUT";

impl DispatcherConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, overlaid with the JSON file at `path` if given, then with
    /// `ASYNC_WARS_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_POOL_SIZE) {
            self.pool_size = parse_env(ENV_POOL_SIZE, value)?;
        }
        if let Some(value) = lookup(ENV_JOIN_ON_TEARDOWN) {
            self.join_on_teardown = parse_env(ENV_JOIN_ON_TEARDOWN, value)?;
        }
        if let Some(value) = lookup(ENV_FIBONACCI_INPUT) {
            self.fibonacci_input = parse_env(ENV_FIBONACCI_INPUT, value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Zero("pool_size"));
        }
        if self.runtime_threads == 0 {
            return Err(ConfigError::Zero("runtime_threads"));
        }
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Zero("broadcast_capacity"));
        }
        if self.fibonacci_input > MAX_U64_INPUT {
            return Err(ConfigError::FibonacciOverflow(self.fibonacci_input));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { key, value })
}
