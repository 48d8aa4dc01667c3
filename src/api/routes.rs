//! API route definitions
//!
//! - /api/v1/health - liveness and uptime
//! - /api/v1/config - active service configuration
//! - /api/v1/graphs - run a web query

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/config", get(handlers::get_config))
        .route("/graphs", post(handlers::create_graph))
        .with_state(state)
}
