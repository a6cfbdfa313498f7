//! Probe endpoints
//!
//! `/health/live` only says the process answers. `/health/ready` drops to 503
//! once shutdown has begun or when no worker can take a job, so a load
//! balancer stops sending admissions. `/health` adds the queue check and is
//! meant for people, not orchestrators.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::dispatcher::DispatchStats;

use super::server::AppState;

// ============================================================================
// Status
// ============================================================================

/// Rolled-up probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            // Degraded still admits requests
            HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

/// One named check inside a probe response
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Body of `/health/live`
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
}

/// Body of `/health/ready`
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
    pub checks: Vec<ComponentHealth>,
}

/// Body of `/health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_secs: u64,
    pub timestamp: String,
    pub checks: Vec<ComponentHealth>,
}

// ============================================================================
// Admission Flag
// ============================================================================

/// Tracks whether the dispatcher is accepting requests
#[derive(Clone)]
pub struct HealthChecker {
    ready: Arc<AtomicBool>,
    start_time: Instant,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            start_time: Instant::now(),
        }
    }

    /// Open admission
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!("Admission open");
    }

    /// Close admission; `/new_request` answers 503 from here on
    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
        tracing::warn!("Admission closed");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn create_health_router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/health", get(health_check))
        .with_state(state)
}

// ============================================================================
// Component Checks
// ============================================================================

fn worker_pool_health(stats: &DispatchStats, latency_ms: u64) -> ComponentHealth {
    let pool = &stats.registry;

    let status = if pool.unhealthy == pool.total_workers {
        HealthStatus::Unhealthy
    } else if pool.unhealthy > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    ComponentHealth {
        name: "worker_pool".to_string(),
        status,
        message: Some(format!(
            "{} total, {} free, {} busy, {} unhealthy",
            pool.total_workers, pool.free, pool.busy, pool.unhealthy
        )),
        latency_ms: Some(latency_ms),
    }
}

fn queue_health(stats: &DispatchStats) -> ComponentHealth {
    let full = stats
        .queue_capacity
        .map(|capacity| stats.queue_len >= capacity)
        .unwrap_or(false);

    ComponentHealth {
        name: "pending_queue".to_string(),
        status: if full {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        },
        message: Some(match stats.queue_capacity {
            Some(capacity) => format!("{}/{} queued", stats.queue_len, capacity),
            None => format!("{} queued", stats.queue_len),
        }),
        latency_ms: None,
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn liveness_probe() -> impl IntoResponse {
    let response = LivenessResponse {
        status: HealthStatus::Healthy,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(response))
}

/// Admission flag plus worker pool
async fn readiness_probe(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = Vec::new();

    let admission = if state.health.is_ready() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };
    checks.push(ComponentHealth {
        name: "admission".to_string(),
        status: admission,
        message: Some(if state.health.is_ready() {
            "accepting requests".to_string()
        } else {
            "shutting down".to_string()
        }),
        latency_ms: None,
    });

    let started = Instant::now();
    let stats = state.dispatcher.stats().await;
    let pool = worker_pool_health(&stats, started.elapsed().as_millis() as u64);

    let overall_status = admission.worst(pool.status);
    checks.push(pool);

    let response = ReadinessResponse {
        status: overall_status,
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks,
    };

    (overall_status.status_code(), Json(response))
}

/// Worker pool plus pending queue
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let stats = state.dispatcher.stats().await;

    let checks = vec![
        worker_pool_health(&stats, started.elapsed().as_millis() as u64),
        queue_health(&stats),
    ];

    let overall_status = checks
        .iter()
        .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status));

    let response = HealthResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks,
    };

    (overall_status.status_code(), Json(response))
}

// ============================================================================
// Tests
// ============================================================================
