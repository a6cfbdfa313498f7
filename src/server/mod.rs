//! HTTP surface of the dispatcher
//!
//! # Endpoints
//!
//! ```text
//! POST /new_request                 - Accept a request (202, or 503 when the queue is full)
//! GET  /status                      - Registry snapshot keyed by worker id
//! GET  /api/health                  - Version and uptime
//! GET  /api/stats                   - Pool, queue and outcome counters
//! GET  /metrics                     - Prometheus metrics
//! POST /api/workers/{id}/restore    - Return a worker to the pool
//! POST /api/workers/{id}/disable    - Exclude a worker
//! GET  /health/live                 - Liveness probe
//! GET  /health/ready                - Readiness probe
//! GET  /health                      - Component health
//! ```

pub mod api;
pub mod health;
#[allow(clippy::module_inception)]
pub mod server;

// Re-export main types
pub use health::{HealthChecker, HealthStatus};
pub use server::{AppState, DispatchServer, ServerError, ServerInfo};
