//! Orchestrator configuration.
//!
//! Every process role (saver, worker pool, submission CLI) is configured from
//! the same set of environment variables so that all of them agree on the
//! broker URL, channel names and work directory.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Names of the broker channels used by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    /// Work-dispatch channel consumed by workers.
    pub dispatch: String,
    /// Init records pushed at submission time.
    pub init: String,
    /// Progress messages pushed by workers.
    pub progress: String,
    /// Terminal results pushed by workers.
    pub result: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            dispatch: "training-queue".to_string(),
            init: "init-queue".to_string(),
            progress: "state-queue".to_string(),
            result: "results-queue".to_string(),
        }
    }
}

impl ChannelNames {
    fn all(&self) -> [&str; 4] {
        [&self.dispatch, &self.init, &self.progress, &self.result]
    }
}

/// Settings shared by every worker in a pool.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Number of worker tasks in one pool.
    pub num_workers: usize,
    /// Timeout of one blocking pop on the dispatch channel.
    pub poll_interval: Duration,
    /// Units of work between two cancellation checks.
    ///
    /// Cancellation latency is bounded by this many units.
    pub cancel_check_every: u32,
    /// Duration of one simulated unit of work.
    pub unit_delay: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            num_workers: 2,
            poll_interval: Duration::from_secs(1),
            cancel_check_every: 1,
            unit_delay: Duration::from_millis(2000),
        }
    }
}

/// Top-level configuration for all orchestrator roles.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Redis connection URL.
    pub redis_url: String,
    /// Root of the job store tree.
    pub workdir: PathBuf,
    /// Broker channel names.
    pub channels: ChannelNames,
    /// Timeout of one saver blocking pop.
    pub saver_poll_timeout: Duration,
    /// Worker pool settings.
    pub worker: WorkerSettings,
    /// Upper bound for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379/0".to_string(),
            workdir: PathBuf::from("./data"),
            channels: ChannelNames::default(),
            saver_poll_timeout: Duration::from_secs(1),
            worker: WorkerSettings::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: broker URL (default: redis://localhost:6379/0)
    /// - `WORKDIR_CONTAINER`: job store root (default: ./data)
    /// - `TRAINING_QUEUE_NAME`: dispatch channel (default: training-queue)
    /// - `INIT_QUEUE_NAME`: init channel (default: init-queue)
    /// - `STATE_QUEUE_NAME`: progress channel (default: state-queue)
    /// - `RESULT_QUEUE_NAME`: result channel (default: results-queue)
    /// - `SAVER_POLL_TIMEOUT`: saver pop timeout in seconds (default: 1)
    /// - `WORKER_COUNT`: workers per pool (default: 2)
    /// - `WORKER_POLL_INTERVAL`: worker pop timeout in seconds (default: 1)
    /// - `WORKER_CANCEL_CHECK_EVERY`: units between cancellation checks (default: 1)
    /// - `WORKER_UNIT_DELAY_MS`: simulated unit duration (default: 2000)
    /// - `SHUTDOWN_TIMEOUT`: graceful shutdown bound in seconds (default: 30)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// `from_env` is this function applied to the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("REDIS_URL") {
            config.redis_url = val;
        }

        if let Some(val) = lookup("WORKDIR_CONTAINER") {
            config.workdir = PathBuf::from(val);
        }

        // Channels
        if let Some(val) = lookup("TRAINING_QUEUE_NAME") {
            config.channels.dispatch = val;
        }

        if let Some(val) = lookup("INIT_QUEUE_NAME") {
            config.channels.init = val;
        }

        if let Some(val) = lookup("STATE_QUEUE_NAME") {
            config.channels.progress = val;
        }

        if let Some(val) = lookup("RESULT_QUEUE_NAME") {
            config.channels.result = val;
        }

        // Timing
        if let Some(val) = lookup("SAVER_POLL_TIMEOUT") {
            let secs: u64 = parse_env_value(&val, "SAVER_POLL_TIMEOUT")?;
            config.saver_poll_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("SHUTDOWN_TIMEOUT") {
            let secs: u64 = parse_env_value(&val, "SHUTDOWN_TIMEOUT")?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        // Workers
        if let Some(val) = lookup("WORKER_COUNT") {
            config.worker.num_workers = parse_env_value(&val, "WORKER_COUNT")?;
        }

        if let Some(val) = lookup("WORKER_POLL_INTERVAL") {
            let secs: u64 = parse_env_value(&val, "WORKER_POLL_INTERVAL")?;
            config.worker.poll_interval = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("WORKER_CANCEL_CHECK_EVERY") {
            config.worker.cancel_check_every = parse_env_value(&val, "WORKER_CANCEL_CHECK_EVERY")?;
        }

        if let Some(val) = lookup("WORKER_UNIT_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "WORKER_UNIT_DELAY_MS")?;
            config.worker.unit_delay = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        let names = self.channels.all();
        if names.iter().any(|n| n.is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "channel names cannot be empty".to_string(),
            ));
        }

        for (i, a) in names.iter().enumerate() {
            if names[i + 1..].contains(a) {
                return Err(ConfigError::ValidationFailed(format!(
                    "channel name '{}' is used for more than one channel",
                    a
                )));
            }
        }

        if self.saver_poll_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "saver_poll_timeout must be greater than 0".to_string(),
            ));
        }

        if self.worker.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        if self.worker.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "worker poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.worker.cancel_check_every == 0 {
            return Err(ConfigError::ValidationFailed(
                "cancel_check_every must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Builder method to set the work directory.
    pub fn with_workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workdir = path.into();
        self
    }

    /// Builder method to set the channel names.
    pub fn with_channels(mut self, channels: ChannelNames) -> Self {
        self.channels = channels;
        self
    }

    /// Builder method to set the saver poll timeout.
    pub fn with_saver_poll_timeout(mut self, timeout: Duration) -> Self {
        self.saver_poll_timeout = timeout;
        self
    }

    /// Builder method to set the worker settings.
    pub fn with_worker(mut self, worker: WorkerSettings) -> Self {
        self.worker = worker;
        self
    }

    /// Builder method to set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
