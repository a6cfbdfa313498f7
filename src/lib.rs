//! jobgate - admission and dispatch for single-capacity model workers
//!
//! Accepts compute requests over HTTP and routes each one to a worker of a
//! fixed pool. Every worker runs one job at a time; requests arriving while
//! all workers are busy wait in a FIFO queue that is drained whenever a
//! worker becomes free.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and the provisioning worker file
//! - [`dispatcher`] - Worker registry, pending queue, forwarding client and dispatch loop
//! - [`server`] - Admission endpoint, status views and health probes (axum)
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus metrics
//! - [`error`] - Unified error type
//!
//! # Example
//!
//! ```no_run
//! use jobgate::config::Config;
//! use jobgate::server::DispatchServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = DispatchServer::new(config)?;
//!     server.start_with_shutdown(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod models;
pub mod server;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::dispatcher::{
        Admission, Deliver, DispatchConfig, DispatchError, Dispatcher, Disposition, WorkerStatus,
    };
    pub use crate::error::{DispatchErrorTrait, Error, ErrorCategory, Result};
    pub use crate::models::{
        CompletedRequest, DeliveryOutcome, NewRequest, TerminalOutcome, WorkerAddress,
        WorkerEndpoint, WorkerId,
    };
    pub use crate::server::DispatchServer;
}

// Direct re-exports for convenience
pub use dispatcher::Dispatcher;
pub use models::{WorkerAddress, WorkerId};
