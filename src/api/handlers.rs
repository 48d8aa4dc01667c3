//! API route handlers

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::reply::{ApiError, Reply};
use crate::config::ServiceConfig;
use crate::pipeline::{self, JobError, JobOptions, JobOutcome};
use crate::types::QueryRequest;

// ============================================================================
// API State
// ============================================================================

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<ServiceConfig>,
    pub options: JobOptions,
    /// Parent of every job token; cancelled on shutdown.
    pub shutdown: CancellationToken,
    pub started: Instant,
}

impl ApiState {
    pub fn new(config: Arc<ServiceConfig>, shutdown: CancellationToken) -> Self {
        let options = JobOptions::from_config(&config);
        Self {
            config,
            options,
            shutdown,
            started: Instant::now(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.config.service.service_timeout_s.max(1))
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/health
pub async fn get_health(State(state): State<ApiState>) -> Reply<HealthResponse> {
    Reply::new(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

/// GET /api/v1/config
pub async fn get_config(State(state): State<ApiState>) -> Reply<ServiceConfig> {
    Reply::new(ServiceConfig::clone(&state.config))
}

/// POST /api/v1/graphs: run one web query to completion.
pub async fn create_graph(
    State(state): State<ApiState>,
    Json(mut request): Json<QueryRequest>,
) -> Result<Reply<JobOutcome>, ApiError> {
    request.web_query = Some(true);
    let query = request
        .into_query(state.config.default_query_type(), Utc::now())
        .map_err(ApiError::Request)?;
    let id = query.id();
    info!(query = %id, "Web query received");

    let cancel = state.shutdown.child_token();
    // stops the stage tasks if the deadline drops the job future
    let _guard = cancel.clone().drop_guard();
    let job = pipeline::run_query(query, &state.config, &state.options, cancel);
    let result = match tokio::time::timeout(state.job_deadline(), job).await {
        Ok(result) => result,
        Err(_) => Err(JobError::TimedOut),
    };

    match result {
        Ok(outcome) => Ok(Reply::for_query(id, outcome)),
        Err(e) => {
            warn!(query = %id, error = %e, "Web query failed");
            Err(ApiError::job(id, e))
        }
    }
}
