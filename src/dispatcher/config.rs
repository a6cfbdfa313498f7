//! Dispatcher configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Retry, timeout and queue settings for the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on one delivery round trip, in milliseconds
    pub delivery_timeout_ms: u64,

    /// Retries granted to a request after its first delivery
    pub max_retries_per_request: u32,

    /// Consecutive transient failures before a worker is marked unhealthy
    pub worker_failure_threshold: u32,

    /// Bound on the pending queue (unbounded when absent)
    pub max_queue_len: Option<usize>,

    /// Buffer of the completed-request broadcast channel
    pub outcome_channel_capacity: usize,

    /// Probe unhealthy workers and restore reachable ones (disabled when absent)
    pub recovery_probe_interval_secs: Option<u64>,

    /// Write periodic registry snapshots to this file (disabled when absent)
    pub snapshot_path: Option<PathBuf>,

    /// Interval between registry snapshots
    pub snapshot_interval_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 30_000,
            max_retries_per_request: 3,
            worker_failure_threshold: 3,
            max_queue_len: None,
            outcome_channel_capacity: 1024,
            recovery_probe_interval_secs: None,
            snapshot_path: None,
            snapshot_interval_secs: 10,
        }
    }
}

impl DispatchConfig {
    /// Create a new config builder
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }

    /// Delivery timeout as Duration
    #[must_use]
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    #[must_use]
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    #[must_use]
    pub fn recovery_probe_interval(&self) -> Option<Duration> {
        self.recovery_probe_interval_secs.map(Duration::from_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "delivery_timeout_ms".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.worker_failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_failure_threshold".to_string(),
                reason: "Must allow at least 1 failure".to_string(),
            });
        }

        if self.max_queue_len == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_queue_len".to_string(),
                reason: "Must allow at least 1 queued request".to_string(),
            });
        }

        if self.outcome_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "outcome_channel_capacity".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.recovery_probe_interval_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "recovery_probe_interval_secs".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.snapshot_path.is_some() && self.snapshot_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "snapshot_interval_secs".to_string(),
                reason: "Must be greater than 0 when snapshots are enabled".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for DispatchConfig
#[derive(Debug, Default)]
pub struct DispatchConfigBuilder {
    delivery_timeout: Option<Duration>,
    max_retries_per_request: Option<u32>,
    worker_failure_threshold: Option<u32>,
    max_queue_len: Option<usize>,
    outcome_channel_capacity: Option<usize>,
    recovery_probe_interval_secs: Option<u64>,
    snapshot_path: Option<PathBuf>,
    snapshot_interval_secs: Option<u64>,
}

impl DispatchConfigBuilder {
    /// Set delivery timeout
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = Some(timeout);
        self
    }

    /// Set retry budget per request
    pub fn max_retries_per_request(mut self, retries: u32) -> Self {
        self.max_retries_per_request = Some(retries);
        self
    }

    /// Set worker failure threshold
    pub fn worker_failure_threshold(mut self, threshold: u32) -> Self {
        self.worker_failure_threshold = Some(threshold);
        self
    }

    /// Bound the pending queue
    pub fn max_queue_len(mut self, len: usize) -> Self {
        self.max_queue_len = Some(len);
        self
    }

    pub fn outcome_channel_capacity(mut self, capacity: usize) -> Self {
        self.outcome_channel_capacity = Some(capacity);
        self
    }

    /// Enable the recovery prober
    pub fn recovery_probe_interval_secs(mut self, secs: u64) -> Self {
        self.recovery_probe_interval_secs = Some(secs);
        self
    }

    /// Enable registry snapshots
    pub fn snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn snapshot_interval_secs(mut self, secs: u64) -> Self {
        self.snapshot_interval_secs = Some(secs);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<DispatchConfig, ConfigError> {
        let defaults = DispatchConfig::default();

        let config = DispatchConfig {
            delivery_timeout_ms: self
                .delivery_timeout
                .map(|d| d.as_millis() as u64)
                .unwrap_or(defaults.delivery_timeout_ms),
            max_retries_per_request: self
                .max_retries_per_request
                .unwrap_or(defaults.max_retries_per_request),
            worker_failure_threshold: self
                .worker_failure_threshold
                .unwrap_or(defaults.worker_failure_threshold),
            max_queue_len: self.max_queue_len,
            outcome_channel_capacity: self
                .outcome_channel_capacity
                .unwrap_or(defaults.outcome_channel_capacity),
            recovery_probe_interval_secs: self.recovery_probe_interval_secs,
            snapshot_path: self.snapshot_path,
            snapshot_interval_secs: self
                .snapshot_interval_secs
                .unwrap_or(defaults.snapshot_interval_secs),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
