use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Parameters of the `worker` command
pub struct WorkerParams {
    pub bind: String,
    pub delay_ms: u64,
    pub fail_every: u64,
}

/// Shared state for the stub worker
struct StubWorkerState {
    delay: Duration,
    fail_every: u64,
    served: AtomicU64,
}

fn stub_router(state: Arc<StubWorkerState>) -> Router {
    Router::new()
        .route("/run_model", post(run_model_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start a stub worker that sleeps, then echoes the input
pub async fn stub_worker(params: WorkerParams) -> Result<()> {
    let WorkerParams {
        bind,
        delay_ms,
        fail_every,
    } = params;

    let state = Arc::new(StubWorkerState {
        delay: Duration::from_millis(delay_ms),
        fail_every,
        served: AtomicU64::new(0),
    });

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    println!("Stub worker listening on http://{bind}");
    println!("  POST /run_model  (delay {delay_ms}ms, fail every {fail_every})");

    axum::serve(listener, stub_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Stub worker failed")?;

    Ok(())
}

async fn run_model_handler(
    State(state): State<Arc<StubWorkerState>>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let n = state.served.fetch_add(1, Ordering::SeqCst) + 1;

    tokio::time::sleep(state.delay).await;

    if state.fail_every > 0 && n % state.fail_every == 0 {
        tracing::warn!(request = n, "Simulating model failure");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "simulated failure", "request": n})),
        );
    }

    let input = payload
        .get("input_text")
        .and_then(Value::as_str)
        .unwrap_or_default();

    tracing::info!(request = n, "Processed request");

    (
        StatusCode::OK,
        Json(json!({
            "output": format!("processed: {input}"),
            "request": n,
        })),
    )
}

async fn health_handler(State(state): State<Arc<StubWorkerState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "served": state.served.load(Ordering::SeqCst),
    }))
}
