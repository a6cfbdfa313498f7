use anyhow::Result;
use clap::{Parser, Subcommand};
use jobgate::config::LoggingConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{LoadTestParams, ServeParams, WorkerParams};

#[derive(Parser)]
#[command(
    name = "jobgate",
    version,
    about = "Admission and dispatch service for a static pool of single-capacity model workers",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format, overrides the configuration
    #[arg(long, global = true, value_parser = ["text", "json"])]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatcher
    Serve {
        /// TOML configuration file (environment variables are used otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to bind, overrides the configuration
        #[arg(short, long)]
        bind: Option<String>,

        /// Provisioning status.json listing the workers
        #[arg(long)]
        worker_file: Option<PathBuf>,

        /// Worker as id=ip:port (repeatable)
        #[arg(short, long = "worker")]
        workers: Vec<String>,

        /// Delivery timeout in milliseconds
        #[arg(long)]
        delivery_timeout_ms: Option<u64>,

        /// Retries granted to each request after its first delivery
        #[arg(long)]
        max_retries: Option<u32>,

        /// Consecutive failures before a worker is marked unhealthy
        #[arg(long)]
        failure_threshold: Option<u32>,

        /// Bound the pending queue
        #[arg(long)]
        max_queue_len: Option<usize>,

        /// Write registry snapshots to this file
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Probe unhealthy workers every N seconds
        #[arg(long)]
        recovery_probe_secs: Option<u64>,
    },

    /// Run a stub model worker exposing /run_model
    Worker {
        /// Address to bind
        #[arg(short, long, default_value = "127.0.0.1:8000")]
        bind: String,

        /// Simulated processing time per request
        #[arg(long, default_value = "500")]
        delay_ms: u64,

        /// Answer 500 to every Nth request (0 disables)
        #[arg(long, default_value = "0")]
        fail_every: u64,
    },

    /// Fire concurrent requests at a running dispatcher
    LoadTest {
        /// Dispatcher base URL
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        url: String,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value = "20")]
        requests: usize,

        /// Requests in flight at once
        #[arg(short, long, default_value = "10")]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cli_logging =
        LoggingConfig::default().with_overrides(cli.log_format.clone(), cli.verbose);

    match cli.command {
        Commands::Serve {
            config,
            bind,
            worker_file,
            workers,
            delivery_timeout_ms,
            max_retries,
            failure_threshold,
            max_queue_len,
            snapshot,
            recovery_probe_secs,
        } => {
            let config_path = config.clone();
            let resolved = commands::resolve_config(ServeParams {
                config,
                bind,
                worker_file,
                workers,
                delivery_timeout_ms,
                max_retries,
                failure_threshold,
                max_queue_len,
                snapshot,
                recovery_probe_secs,
                log_format: cli.log_format,
                verbose: cli.verbose,
            })?;
            setup_tracing(&resolved.logging);

            tracing::info!(
                config = ?config_path,
                bind = %resolved.server.bind_address,
                log_level = %resolved.logging.level,
                "Starting serve command"
            );
            commands::dispatch_server(resolved).await?;
        }

        Commands::Worker {
            bind,
            delay_ms,
            fail_every,
        } => {
            setup_tracing(&cli_logging);
            tracing::info!(
                bind = %bind,
                delay_ms = %delay_ms,
                fail_every = %fail_every,
                "Starting worker command"
            );
            commands::stub_worker(WorkerParams {
                bind,
                delay_ms,
                fail_every,
            })
            .await?;
        }

        Commands::LoadTest {
            url,
            requests,
            concurrency,
        } => {
            setup_tracing(&cli_logging);
            tracing::info!(
                url = %url,
                requests = %requests,
                concurrency = %concurrency,
                "Starting load-test command"
            );
            commands::load_test(LoadTestParams {
                url,
                requests,
                concurrency,
            })
            .await?;
        }
    }

    Ok(())
}

fn setup_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.filter_directives()));

    if logging.is_json() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}
