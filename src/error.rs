//! Crate-wide error type
//!
//! Each subsystem keeps its own error enum next to the code that raises it.
//! [`Error`] wraps them for callers that cross subsystem boundaries, and
//! [`DispatchErrorTrait`] lets handlers decide on retries and HTTP status
//! without matching every variant.
//!
//! ```rust,ignore
//! use jobgate::error::{DispatchErrorTrait, Error};
//!
//! fn report(err: &Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = err.category().as_str(), "{err}");
//!     } else {
//!         tracing::error!("{err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::dispatcher::config::ConfigError;
pub use crate::dispatcher::error::DispatchError;
pub use crate::dispatcher::queue::QueueError;
pub use crate::dispatcher::registry::RegistryError;
pub use crate::server::ServerError;

/// Common trait for all jobgate error types
pub trait DispatchErrorTrait: std::error::Error {
    /// Whether trying again later can succeed
    fn is_recoverable(&self) -> bool;

    fn category(&self) -> ErrorCategory;
}

/// Coarse error class, used for HTTP status and log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Worker transport errors (unreachable, timeout, client setup)
    Network,
    /// A worker answered with an error status
    Remote,
    /// Pool state: unknown workers, rejected transitions, exhausted workers
    Pool,
    /// Admission refused for lack of capacity
    Capacity,
    /// Invalid settings or worker pool
    Config,
    /// Snapshot files
    Storage,
    /// Serialization errors
    Parsing,
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Remote => "remote",
            Self::Pool => "pool",
            Self::Capacity => "capacity",
            Self::Config => "config",
            Self::Storage => "storage",
            Self::Parsing => "parsing",
            Self::Other => "other",
        }
    }
}

impl DispatchErrorTrait for DispatchError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::WorkerUnreachable { .. } | Self::DeliveryTimeout { .. } => true,
            // Capacity returns as workers finish
            Self::QueueOverflow { .. } => true,
            Self::Client(_) => true,
            Self::RemoteError { .. }
            | Self::WorkerExhausted { .. }
            | Self::UnknownWorker(_)
            | Self::InvalidPool(_)
            | Self::Registry(_)
            | Self::Config(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::WorkerUnreachable { .. } | Self::DeliveryTimeout { .. } | Self::Client(_) => {
                ErrorCategory::Network
            }
            Self::RemoteError { .. } => ErrorCategory::Remote,
            Self::WorkerExhausted { .. } | Self::UnknownWorker(_) | Self::Registry(_) => {
                ErrorCategory::Pool
            }
            Self::QueueOverflow { .. } => ErrorCategory::Capacity,
            Self::InvalidPool(_) | Self::Config(_) => ErrorCategory::Config,
        }
    }
}

/// Unified error type for the jobgate crate
#[derive(Error, Debug)]
pub enum Error {
    /// Dispatch errors (delivery, capacity, pool)
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parse errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// Anything raised through `anyhow`
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl DispatchErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Dispatch(e) => e.is_recoverable(),
            Self::Server(_) => false,
            Self::Io(_) => true,
            Self::Json(_) | Self::Toml(_) => false,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Dispatch(e) => e.category(),
            Self::Server(ServerError::ConfigError(_)) => ErrorCategory::Config,
            Self::Server(_) => ErrorCategory::Network,
            Self::Http(_) => ErrorCategory::Network,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Parsing,
            Self::Toml(_) | Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Self::Dispatch(err.into())
    }
}

impl From<QueueError> for Error {
    fn from(err: QueueError) -> Self {
        Self::Dispatch(err.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
