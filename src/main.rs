//! rsam-ssam - RSAM / SSAM products from seismic waveform streams
//!
//! # Usage
//!
//! ```bash
//! # HTTP API plus the periodic grapher
//! rsam-ssam serve
//!
//! # One query against the configured FDSN server
//! rsam-ssam run --net NZ --sta WIZ --cha HHZ --loc 10 --from 2024-03-01 --to 2024-03-02
//!
//! # Replay local miniSEED files, no gnuplot
//! rsam-ssam run --net NZ --sta WIZ --cha HHZ --mseed day.mseed --no-plot
//!
//! # One round of the periodic grapher
//! rsam-ssam periodic --once
//! ```
//!
//! # Environment Variables
//!
//! - `RSAM_CONFIG`: Path to the TOML config (default: `./conf/config.toml`)
//! - `RSAM_LOG_FORMAT`: `json` for structured log lines
//! - `RSAM_CORS_ORIGINS`: Comma-separated origins allowed by the API
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use rsam_ssam::acquisition::MseedFileSource;
use rsam_ssam::api::{create_app, ApiState};
use rsam_ssam::background::PeriodicGrapher;
use rsam_ssam::config::{self, ServiceConfig};
use rsam_ssam::pipeline::{self, JobOptions};
use rsam_ssam::types::QueryRequest;

/// Environment variable selecting the log line format.
const LOG_FORMAT_ENV_VAR: &str = "RSAM_LOG_FORMAT";

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "rsam-ssam")]
#[command(about = "RSAM and SSAM products from FDSN, SeedLink and Winston streams")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config, overriding the RSAM_CONFIG / ./conf search
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run the HTTP API and the periodic grapher (default)
    Serve,

    /// Run a single query and print the outcome
    Run(RunArgs),

    /// Run the periodic grapher without the HTTP API
    Periodic {
        /// Run one round and exit
        #[arg(long)]
        once: bool,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// JSON file holding one query; replaces the query flags
    #[arg(long, value_name = "FILE", conflicts_with_all = ["net", "sta", "cha"])]
    query: Option<PathBuf>,

    #[arg(long, required_unless_present = "query")]
    net: Option<String>,
    #[arg(long, required_unless_present = "query")]
    sta: Option<String>,
    #[arg(long, required_unless_present = "query")]
    cha: Option<String>,
    #[arg(long, default_value = "")]
    loc: String,

    /// Start day, yyyy-MM-dd
    #[arg(long, requires = "to")]
    from: Option<String>,
    /// End day, yyyy-MM-dd
    #[arg(long, requires = "from")]
    to: Option<String>,
    /// Start time, HH:mm
    #[arg(long)]
    from_time: Option<String>,
    /// End time, HH:mm
    #[arg(long)]
    to_time: Option<String>,

    /// fdsn, seedlink or winston
    #[arg(long = "type")]
    query_type: Option<String>,
    #[arg(long)]
    window_size: Option<usize>,
    /// hann, hamming, blackman, bartlett or rectangular
    #[arg(long)]
    window_function: Option<String>,
    /// Cutoff frequency in Hz
    #[arg(long)]
    cutoff: Option<u32>,
    #[arg(long)]
    response_factor: Option<f64>,
    #[arg(long)]
    max_power: Option<u32>,
    /// Graph format: png or svg
    #[arg(long)]
    format: Option<String>,

    /// Replay local miniSEED files instead of querying a server
    #[arg(long, num_args = 1.., value_name = "FILE")]
    mseed: Vec<PathBuf>,

    /// Skip gnuplot
    #[arg(long)]
    no_plot: bool,
}

impl RunArgs {
    fn into_request(self) -> Result<QueryRequest> {
        if let Some(path) = &self.query {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            return serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()));
        }
        Ok(QueryRequest {
            network: self.net.unwrap_or_default(),
            station: self.sta.unwrap_or_default(),
            component: self.cha.unwrap_or_default(),
            location: self.loc,
            query_type: self.query_type,
            cutoff: self.cutoff,
            max_power: self.max_power,
            web_query: None,
            from: self.from,
            to: self.to,
            from_time: self.from_time,
            to_time: self.to_time,
            graph_format: self.format,
            graph_width: None,
            graph_height: None,
            window_size: self.window_size,
            window_function: self.window_function,
            response_factor: self.response_factor,
        })
    }
}

// ============================================================================
// Supervisor
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    PeriodicGrapher,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::PeriodicGrapher => write!(f, "PeriodicGrapher"),
        }
    }
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

fn spawn_periodic_grapher(
    task_set: &mut JoinSet<Result<TaskName>>,
    grapher: PeriodicGrapher,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[PeriodicGrapher] Task starting");
        grapher.run(cancel_token).await;
        Ok(TaskName::PeriodicGrapher)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // let the server drain and the grapher finish its current job
    while let Some(result) = task_set.join_next().await {
        if let Ok(Ok(task_name)) = result {
            info!("Supervisor: task {} stopped", task_name);
        }
    }
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn serve(config: Arc<ServiceConfig>, cancel_token: CancellationToken) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.service.web_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP API listening");

    let state = ApiState::new(Arc::clone(&config), cancel_token.clone());
    let grapher = PeriodicGrapher::new(Arc::clone(&config), JobOptions::from_config(&config));

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, create_app(state), cancel_token.clone());
    spawn_periodic_grapher(&mut task_set, grapher, cancel_token.clone());

    run_supervisor(&mut task_set, cancel_token).await
}

async fn run_once(
    args: RunArgs,
    config: Arc<ServiceConfig>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mseed = args.mseed.clone();
    let no_plot = args.no_plot;
    let query = args
        .into_request()?
        .into_query(config.default_query_type(), Utc::now())?;

    let mut options = JobOptions::from_config(&config);
    if no_plot {
        options = options.without_plot();
    }

    let outcome = if mseed.is_empty() {
        pipeline::run_query(query, &config, &options, cancel_token).await?
    } else {
        info!(files = mseed.len(), "Replaying local miniSEED");
        let source = Box::new(MseedFileSource::new(mseed));
        pipeline::run_job(query, source, &options, cancel_token).await?
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn periodic(
    once: bool,
    config: Arc<ServiceConfig>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let grapher = PeriodicGrapher::new(Arc::clone(&config), JobOptions::from_config(&config));
    if once {
        let report = grapher.run_once(Utc::now(), &cancel_token).await;
        info!(report = %report, "Periodic round done");
        return Ok(());
    }
    grapher.run(cancel_token).await;
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV_VAR).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ServiceConfig> {
    match path {
        Some(path) => ServiceConfig::load_from_file(path)
            .with_context(|| format!("invalid config {}", path.display())),
        None => Ok(ServiceConfig::load()),
    }
}

fn main() -> Result<()> {
    init_logging();
    let args = CliArgs::parse();

    config::init(load_config(args.config.as_ref())?);
    let config = Arc::new(config::get().clone());

    // worker count comes from the config, so the runtime is built by hand
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.service.thread_pool_size)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        // Graceful shutdown via Ctrl+C
        let cancel_token = CancellationToken::new();
        let shutdown_token = cancel_token.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received Ctrl+C, initiating shutdown");
            shutdown_token.cancel();
        });

        match args.command.unwrap_or(SubCommand::Serve) {
            SubCommand::Serve => serve(config, cancel_token).await,
            SubCommand::Run(run) => run_once(run, config, cancel_token).await,
            SubCommand::Periodic { once } => periodic(once, config, cancel_token).await,
        }
    })?;

    info!("rsam-ssam shutdown complete");
    Ok(())
}
