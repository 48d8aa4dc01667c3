//! REST API module using Axum
//!
//! - `/api/v1` JSON endpoints, replies shaped by [`reply`]
//! - `/output` static files from the job output tree

pub mod handlers;
pub mod reply;
mod routes;

pub use handlers::ApiState;

use axum::http::{header, Method};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Environment variable with a comma-separated list of allowed origins.
pub const CORS_ORIGINS_ENV_VAR: &str = "RSAM_CORS_ORIGINS";

/// Build a CORS layer that is restrictive by default (same-origin only).
fn build_cors_layer() -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    match std::env::var(CORS_ORIGINS_ENV_VAR) {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            layer.allow_origin(allowed)
        }
        Err(_) => layer,
    }
}

/// Create the complete application router.
pub fn create_app(state: ApiState) -> Router {
    let output = ServeDir::new(&state.config.service.output_dir);

    Router::new()
        .nest("/api/v1", routes::api_routes(state))
        .nest_service("/output", output)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer())
}
