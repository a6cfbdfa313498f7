//! Dispatcher HTTP server
//!
//! Wires the dispatcher, the API and health routers, the background tasks and
//! graceful shutdown together.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, ServerConfig};
use crate::dispatcher::snapshot::write_snapshot;
use crate::dispatcher::Dispatcher;

use super::api::create_router;
use super::health::{create_health_router, HealthChecker};

// ============================================================================
// State
// ============================================================================

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// Request dispatcher
    pub dispatcher: Arc<Dispatcher>,

    /// Admission and readiness flag
    pub health: HealthChecker,

    pub start_time: Instant,

    pub config: ServerConfig,
}

// ============================================================================
// Dispatch Server
// ============================================================================

/// Main dispatcher server
pub struct DispatchServer {
    config: ServerConfig,
    state: AppState,
}

impl DispatchServer {
    /// Create a server that forwards to the configured workers over HTTP
    pub fn new(config: Config) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(format!("{e:#}")))?;

        let workers = config
            .worker_addresses()
            .map_err(|e| ServerError::ConfigError(format!("{e:#}")))?;

        let dispatcher = Dispatcher::with_http(workers, config.dispatch.clone())
            .map_err(|e| ServerError::InitError(e.to_string()))?;

        Ok(Self::with_dispatcher(config.server, dispatcher))
    }

    /// Create a server around an existing dispatcher
    pub fn with_dispatcher(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let health = HealthChecker::new();
        health.mark_ready();

        let state = AppState {
            dispatcher,
            health,
            start_time: Instant::now(),
            config: config.clone(),
        };

        Self { config, state }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.state.dispatcher
    }

    /// API and probe routes with the configured layers
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone())
            .merge(create_health_router(self.state.clone()));

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Bind the configured address and serve until `shutdown_signal` resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr: SocketAddr = self
            .config
            .bind_address
            .parse()
            .map_err(|e| ServerError::ConfigError(format!("Invalid bind address: {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        self.serve_with_listener(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener
    ///
    /// After `shutdown_signal` resolves, admission stops and the server waits
    /// up to the grace period for queued and in-flight requests to finish.
    pub async fn serve_with_listener(
        &self,
        listener: TcpListener,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        tracing::info!("Starting dispatcher server on {} (with graceful shutdown)", local_addr);

        let background = self.state.dispatcher.start_background_tasks();
        tracing::info!(tasks = background.len(), "Background tasks started");

        let health = self.state.health.clone();
        let signal = async move {
            shutdown_signal.await;
            health.mark_not_ready();
        };

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()));

        self.drain().await;

        for handle in background {
            handle.abort();
        }

        served?;
        tracing::info!("Dispatcher server shutdown complete");
        Ok(())
    }

    /// Wait for outstanding work and report anything abandoned
    async fn drain(&self) {
        let dispatcher = &self.state.dispatcher;
        let grace = self.config.shutdown_grace();

        let remaining = dispatcher.wait_idle(grace).await;
        if remaining > 0 {
            let stats = dispatcher.stats().await;
            tracing::warn!(
                remaining,
                queued = stats.queue_len,
                in_flight = stats.in_flight,
                grace_secs = grace.as_secs(),
                "Shutting down with unfinished requests; they will not be delivered"
            );
        } else {
            tracing::info!("All accepted requests finished");
        }

        if let Some(path) = &dispatcher.config().snapshot_path {
            if let Err(e) = write_snapshot(path, &dispatcher.snapshot().await).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write final snapshot");
            }
        }
    }

    /// Settings summary for the startup banner
    pub fn info(&self) -> ServerInfo {
        let dispatch = self.state.dispatcher.config();

        ServerInfo {
            bind_address: self.config.bind_address.clone(),
            delivery_timeout_ms: dispatch.delivery_timeout_ms,
            max_retries_per_request: dispatch.max_retries_per_request,
            worker_failure_threshold: dispatch.worker_failure_threshold,
            max_queue_len: dispatch.max_queue_len,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: String,
    pub delivery_timeout_ms: u64,
    pub max_retries_per_request: u32,
    pub worker_failure_threshold: u32,
    pub max_queue_len: Option<usize>,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    pub fn display(&self) -> String {
        format!(
            "Dispatcher Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Delivery Timeout: {}ms\n\
             Max Retries: {}\n\
             Failure Threshold: {}\n\
             Queue Bound: {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.delivery_timeout_ms,
            self.max_retries_per_request,
            self.worker_failure_threshold,
            self.max_queue_len
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unbounded".to_string()),
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures while building or running the server
#[derive(Debug, Clone)]
pub enum ServerError {
    ConfigError(String),

    /// Dispatcher or HTTP client construction failed
    InitError(String),

    BindError(String),

    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::InitError(msg) => write!(f, "Initialization error: {}", msg),
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// Tests
// ============================================================================
