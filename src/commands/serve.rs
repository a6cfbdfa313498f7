use anyhow::{Context, Result};
use std::path::PathBuf;

use jobgate::config::Config;
use jobgate::metrics;
use jobgate::models::WorkerAddress;
use jobgate::server::DispatchServer;

/// Parameters of the `serve` command
pub struct ServeParams {
    pub config: Option<PathBuf>,
    pub bind: Option<String>,
    pub worker_file: Option<PathBuf>,
    pub workers: Vec<String>,
    pub delivery_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub failure_threshold: Option<u32>,
    pub max_queue_len: Option<usize>,
    pub snapshot: Option<PathBuf>,
    pub recovery_probe_secs: Option<u64>,
    pub log_format: Option<String>,
    pub verbose: bool,
}

/// Load the configuration and apply the command-line overrides
pub fn resolve_config(params: ServeParams) -> Result<Config> {
    let mut config = match &params.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    if let Some(bind) = params.bind {
        config.server.bind_address = bind;
    }
    if let Some(path) = params.worker_file {
        config.worker_file = Some(path);
    }
    for spec in &params.workers {
        let address = WorkerAddress::parse_spec(spec).map_err(anyhow::Error::msg)?;
        config.workers.push(address);
    }
    if let Some(ms) = params.delivery_timeout_ms {
        config.dispatch.delivery_timeout_ms = ms;
    }
    if let Some(retries) = params.max_retries {
        config.dispatch.max_retries_per_request = retries;
    }
    if let Some(threshold) = params.failure_threshold {
        config.dispatch.worker_failure_threshold = threshold;
    }
    if let Some(len) = params.max_queue_len {
        config.dispatch.max_queue_len = Some(len);
    }
    if let Some(path) = params.snapshot {
        config.dispatch.snapshot_path = Some(path);
    }
    if let Some(secs) = params.recovery_probe_secs {
        config.dispatch.recovery_probe_interval_secs = Some(secs);
    }
    config.logging = config
        .logging
        .with_overrides(params.log_format, params.verbose);

    config.validate()?;
    Ok(config)
}

/// Start the dispatcher server
pub async fn dispatch_server(config: Config) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    let server = DispatchServer::new(config).context("Failed to create dispatcher server")?;

    println!("{}", server.info().display());
    println!();
    println!("API Endpoints:");
    println!("  POST /new_request               - Submit a request");
    println!("  GET  /status                    - Worker registry snapshot");
    println!("  GET  /api/health                - Health check");
    println!("  GET  /api/stats                 - Dispatcher stats");
    println!("  GET  /metrics                   - Prometheus metrics endpoint");
    println!("  POST /api/workers/{{id}}/restore  - Return a worker to the pool");
    println!("  POST /api/workers/{{id}}/disable  - Exclude a worker");
    println!();
    println!("Press Ctrl+C to stop.\n");

    // Start with graceful shutdown
    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await?;

    println!("Dispatcher server stopped.");
    Ok(())
}
