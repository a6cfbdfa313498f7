//! Configuration management for the jobgate dispatcher
//!
//! Settings come from a TOML file or from `DISPATCH_*` environment variables;
//! the `serve` command applies its flags on top.

pub mod workers;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatcher::DispatchConfig;
use crate::models::WorkerAddress;

pub use workers::load_worker_file;

/// Everything `jobgate serve` needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Dispatch configuration (timeouts, retries, queue bound)
    pub dispatch: DispatchConfig,

    /// Workers listed inline
    pub workers: Vec<WorkerAddress>,

    /// Provisioning `status.json` to load workers from
    pub worker_file: Option<PathBuf>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: String,

    /// Enable CORS
    pub enable_cors: bool,

    /// Per-request access logs through `TraceLayer`
    pub enable_request_logging: bool,

    /// How long shutdown waits for queued and in-flight requests
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0:8080"),
            enable_cors: true,
            enable_request_logging: true,
            shutdown_grace_secs: 30,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Logging configuration
///
/// `RUST_LOG`, when set, replaces the filter built from `level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl LoggingConfig {
    /// Apply `--log-format` and `--verbose`, which win over the file and environment
    #[must_use]
    pub fn with_overrides(mut self, format: Option<String>, verbose: bool) -> Self {
        if let Some(format) = format {
            self.format = format;
        }
        if verbose {
            self.level = String::from("debug");
        }
        self
    }

    /// `EnvFilter` directives for the configured level
    pub fn filter_directives(&self) -> String {
        format!("jobgate={0},tower_http={0},warn", self.level)
    }

    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Read `DISPATCH_*` variables, defaulting anything unset
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_address =
            std::env::var("DISPATCH_BIND").unwrap_or(defaults.server.bind_address);

        let shutdown_grace_secs = env_parse("DISPATCH_SHUTDOWN_GRACE_SECS")
            .unwrap_or(defaults.server.shutdown_grace_secs);

        let dispatch = DispatchConfig {
            delivery_timeout_ms: env_parse("DISPATCH_DELIVERY_TIMEOUT_MS")
                .unwrap_or(defaults.dispatch.delivery_timeout_ms),
            max_retries_per_request: env_parse("DISPATCH_MAX_RETRIES")
                .unwrap_or(defaults.dispatch.max_retries_per_request),
            worker_failure_threshold: env_parse("DISPATCH_FAILURE_THRESHOLD")
                .unwrap_or(defaults.dispatch.worker_failure_threshold),
            max_queue_len: env_parse("DISPATCH_MAX_QUEUE_LEN"),
            recovery_probe_interval_secs: env_parse("DISPATCH_RECOVERY_PROBE_SECS"),
            snapshot_path: std::env::var("DISPATCH_SNAPSHOT_PATH").ok().map(PathBuf::from),
            ..defaults.dispatch
        };

        let workers = match std::env::var("DISPATCH_WORKERS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|spec| WorkerAddress::parse_spec(spec).map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()
                .context("Invalid DISPATCH_WORKERS")?,
            Err(_) => Vec::new(),
        };

        let worker_file = std::env::var("DISPATCH_WORKER_FILE").ok().map(PathBuf::from);

        let log_level =
            std::env::var("DISPATCH_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));

        let log_format =
            std::env::var("DISPATCH_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            server: ServerConfig {
                bind_address,
                shutdown_grace_secs,
                ..defaults.server
            },
            dispatch,
            workers,
            worker_file,
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Read a TOML file; missing sections take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.dispatch
            .validate()
            .context("Invalid dispatch configuration")?;

        self.bind_addr()?;

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json'");
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            anyhow::bail!(
                "log level must be trace, debug, info, warn or error, got '{}'",
                self.logging.level
            );
        }

        Ok(())
    }

    /// Parsed bind address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind_address))
    }

    /// Worker pool: the worker file entries followed by the inline list
    pub fn worker_addresses(&self) -> Result<Vec<WorkerAddress>> {
        let mut addresses = match &self.worker_file {
            Some(path) => load_worker_file(path)?,
            None => Vec::new(),
        };
        addresses.extend(self.workers.iter().cloned());

        if addresses.is_empty() {
            anyhow::bail!("No workers configured (set workers or worker_file)");
        }

        Ok(addresses)
    }
}
