//! Request dispatcher for single-capacity workers
//!
//! Routes incoming compute requests to a fixed pool of workers that each run
//! one job at a time, queueing requests while every worker is busy.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               Dispatcher                 │
//! │                                          │
//! │  Mutex<DispatchState>                    │
//! │  ┌──────────────────┐ ┌───────────────┐  │
//! │  │  Worker Registry │ │ Pending Queue │  │
//! │  │  - try_set_busy  │ │  - enqueue    │  │
//! │  │  - release       │ │  - requeue    │  │
//! │  │  - mark_*        │ │  - dequeue    │  │
//! │  └──────────────────┘ └───────────────┘  │
//! │            │ drain on every release      │
//! │            ▼                             │
//! │  ┌────────────────────────────────────┐  │
//! │  │  Delivery tasks (no lock held)     │  │
//! │  │  Deliver → POST /run_model         │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use jobgate::dispatcher::{DispatchConfig, Dispatcher};
//! use jobgate::models::WorkerAddress;
//!
//! let workers = vec![WorkerAddress::new("container1", "10.0.0.5", 8001)];
//! let dispatcher = Dispatcher::with_http(workers, DispatchConfig::default())?;
//! let admission = dispatcher.submit(serde_json::json!({"input_text": "hello"})).await?;
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod queue;
pub mod registry;
pub mod snapshot;

// Re-export main types
pub use client::{Deliver, HttpForwarder};
pub use config::{ConfigError, DispatchConfig};
pub use dispatch::{Admission, Disposition, DispatchStats, Dispatcher};
pub use error::DispatchError;
pub use queue::{PendingQueue, QueueError};
pub use registry::{
    RegistryError, RegistrySnapshot, RegistryStats, Release, WorkerRegistry, WorkerStatus,
    WorkerView,
};
