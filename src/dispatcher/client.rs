//! Forwarding client
//!
//! Sends a request payload to a worker's `/run_model` endpoint and classifies
//! the result. Delivery runs outside the dispatcher lock; only the status
//! transitions around it are serialized.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::models::{DeliveryOutcome, WorkerEndpoint};

use super::error::DispatchError;

/// Transport used by the dispatcher to reach workers
#[async_trait]
pub trait Deliver: Send + Sync {
    /// Deliver one payload and classify the result
    async fn deliver(&self, worker: &WorkerEndpoint, payload: &Value) -> DeliveryOutcome;

    /// Cheap liveness check used to restore unhealthy workers
    async fn probe(&self, worker: &WorkerEndpoint) -> bool;
}

/// reqwest-backed [`Deliver`] implementation
pub struct HttpForwarder {
    http_client: Client,
    probe_timeout: Duration,
}

impl HttpForwarder {
    /// Create a forwarder whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            probe_timeout: timeout.min(Duration::from_secs(2)),
        })
    }

    fn classify(err: reqwest::Error) -> DeliveryOutcome {
        if err.is_timeout() {
            DeliveryOutcome::Timeout
        } else {
            DeliveryOutcome::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl Deliver for HttpForwarder {
    async fn deliver(&self, worker: &WorkerEndpoint, payload: &Value) -> DeliveryOutcome {
        let url = worker.run_model_url();

        tracing::debug!(worker = %worker.id, url = %url, "Forwarding request to worker");

        let response = match self.http_client.post(&url).json(payload).send().await {
            Ok(response) => response,
            Err(e) => return Self::classify(e),
        };

        let status = response.status();

        if status != StatusCode::OK {
            return DeliveryOutcome::RemoteError {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            };
        }

        match response.bytes().await {
            Ok(bytes) => {
                let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                });
                DeliveryOutcome::Success(body)
            }
            Err(e) => Self::classify(e),
        }
    }

    async fn probe(&self, worker: &WorkerEndpoint) -> bool {
        matches!(
            tokio::time::timeout(self.probe_timeout, TcpStream::connect(worker.address())).await,
            Ok(Ok(_))
        )
    }
}
