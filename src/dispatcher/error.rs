//! Dispatcher error taxonomy

use std::time::Duration;
use thiserror::Error;

use crate::models::{DeliveryOutcome, WorkerId};

use super::config::ConfigError;
use super::queue::QueueError;
use super::registry::RegistryError;

/// Errors raised by the dispatch subsystem
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Connection refused/reset or DNS failure
    #[error("Worker {worker} unreachable: {cause}")]
    WorkerUnreachable { worker: WorkerId, cause: String },

    /// No answer within the delivery timeout
    #[error("Delivery to worker {worker} timed out after {timeout_ms}ms")]
    DeliveryTimeout { worker: WorkerId, timeout_ms: u64 },

    /// Worker answered with an error status
    #[error("Worker {worker} responded with status {status}")]
    RemoteError {
        worker: WorkerId,
        status: u16,
        body: String,
    },

    /// Worker crossed the failure threshold and was excluded
    #[error("Worker {worker} marked unhealthy after {failures} consecutive failures")]
    WorkerExhausted { worker: WorkerId, failures: u32 },

    /// Bounded queue is full; new request rejected
    #[error("Pending queue full ({capacity} requests)")]
    QueueOverflow { capacity: usize },

    /// Operator named a worker that is not in the pool
    #[error("Unknown worker: {0}")]
    UnknownWorker(WorkerId),

    /// Provisioning output cannot form a pool
    #[error("Invalid worker pool: {0}")]
    InvalidPool(RegistryError),

    /// Registry rejected a transition
    #[error("Registry error: {0}")]
    Registry(RegistryError),

    #[error("Invalid dispatcher configuration: {0}")]
    Config(#[from] ConfigError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl DispatchError {
    /// Describe a failed delivery attempt, `None` for a success
    pub fn from_delivery(worker: &WorkerId, outcome: &DeliveryOutcome, timeout: Duration) -> Option<Self> {
        match outcome {
            DeliveryOutcome::Success(_) => None,
            DeliveryOutcome::RemoteError { status, body } => Some(Self::RemoteError {
                worker: worker.clone(),
                status: *status,
                body: body.clone(),
            }),
            DeliveryOutcome::Unreachable(cause) => Some(Self::WorkerUnreachable {
                worker: worker.clone(),
                cause: cause.clone(),
            }),
            DeliveryOutcome::Timeout => Some(Self::DeliveryTimeout {
                worker: worker.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Retried locally rather than surfaced
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WorkerUnreachable { .. } | Self::DeliveryTimeout { .. }
        )
    }
}

impl From<RegistryError> for DispatchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::WorkerNotFound(id) => Self::UnknownWorker(id),
            RegistryError::Empty | RegistryError::DuplicateWorker(_) => Self::InvalidPool(err),
            RegistryError::NotBusy { .. } => Self::Registry(err),
        }
    }
}

impl From<QueueError> for DispatchError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full { capacity } => Self::QueueOverflow { capacity },
        }
    }
}
