//! REST API handlers for the dispatcher
//!
//! This module defines the admission endpoint, the read-only status views and
//! the operator controls.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::dispatcher::{Admission, DispatchError, DispatchStats, Disposition, WorkerStatus};
use crate::error::{DispatchErrorTrait, ErrorCategory};
use crate::metrics;
use crate::models::{NewRequest, WorkerId};

use super::server::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Envelope for the `/api/*` JSON bodies
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Body of every error answer
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Acknowledgement returned by `POST /new_request`
#[derive(Debug, Serialize)]
pub struct NewRequestResponse {
    pub message: String,
    pub request_id: Uuid,
    pub disposition: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

impl From<Admission> for NewRequestResponse {
    fn from(admission: Admission) -> Self {
        let message = match admission.disposition {
            Disposition::Dispatched => "Request received and processing started.",
            Disposition::Queued => "Request received and queued until a worker is free.",
        };

        Self {
            message: message.to_string(),
            request_id: admission.request_id,
            disposition: admission.disposition,
            queue_position: admission.queue_position,
        }
    }
}

/// Body of `/api/health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub dispatch: DispatchStats,
    pub uptime_secs: u64,
}

/// Result of an operator action on a worker
#[derive(Debug, Serialize)]
pub struct WorkerActionResponse {
    pub worker: WorkerId,
    pub status: WorkerStatus,
}

// ============================================================================
// API Routes
// ============================================================================

/// Admission, status and operator routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Admission
        .route("/new_request", post(new_request))
        // Read-only registry projection
        .route("/status", get(get_status))
        // Health and stats
        .route("/api/health", get(health_check))
        .route("/api/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        // Operator controls
        .route("/api/workers/{id}/restore", post(restore_worker))
        .route("/api/workers/{id}/disable", post(disable_worker))
        .with_state(state)
}

fn error_status(err: &DispatchError) -> StatusCode {
    if let DispatchError::UnknownWorker(_) = err {
        return StatusCode::NOT_FOUND;
    }

    match err.category() {
        ErrorCategory::Capacity => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::Network | ErrorCategory::Remote => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Admission Handlers
// ============================================================================

/// Accept a request and hand it to the dispatcher
///
/// Answers as soon as the request is dispatched or queued; the worker's reply
/// is never awaited here.
async fn new_request(
    State(state): State<AppState>,
    Json(request): Json<NewRequest>,
) -> axum::response::Response {
    if !state.health.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("Dispatcher is shutting down")),
        )
            .into_response();
    }

    match state.dispatcher.submit(request.into_payload()).await {
        Ok(admission) => (
            StatusCode::ACCEPTED,
            Json(NewRequestResponse::from(admission)),
        )
            .into_response(),
        Err(e) => (error_status(&e), Json(ErrorResponse::new(e.to_string()))).into_response(),
    }
}

// ============================================================================
// Status Handlers
// ============================================================================

/// Registry snapshot keyed by worker id
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dispatcher.snapshot().await)
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();

    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
    }))
}

/// Get dispatcher stats
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(StatsResponse {
        dispatch: state.dispatcher.stats().await,
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

/// Prometheus text exposition
async fn get_metrics() -> axum::response::Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("Failed to encode metrics: {e}"))),
        )
            .into_response(),
    }
}

// ============================================================================
// Operator Handlers
// ============================================================================

/// Return a worker to the pool
async fn restore_worker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let worker = WorkerId::new(id);

    match state.dispatcher.mark_healthy(&worker).await {
        Ok(_) => worker_action_response(&state, worker).await,
        Err(e) => (error_status(&e), Json(ErrorResponse::new(e.to_string()))).into_response(),
    }
}

/// Exclude a worker from acquisition
async fn disable_worker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let worker = WorkerId::new(id);

    match state.dispatcher.mark_unhealthy(&worker).await {
        Ok(status) => (
            StatusCode::OK,
            Json(ApiResponse::success(WorkerActionResponse { worker, status })),
        )
            .into_response(),
        Err(e) => (error_status(&e), Json(ErrorResponse::new(e.to_string()))).into_response(),
    }
}

async fn worker_action_response(state: &AppState, worker: WorkerId) -> axum::response::Response {
    let snapshot = state.dispatcher.snapshot().await;

    match snapshot.get(&worker) {
        Some(view) => (
            StatusCode::OK,
            Json(ApiResponse::success(WorkerActionResponse {
                status: view.status,
                worker,
            })),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!("Worker not found: {worker}"))),
        )
            .into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
