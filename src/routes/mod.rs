//! Route modules for Evidence Intake

pub mod health;
pub mod upload;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Multipart framing allowance on top of the largest accepted chunk
const BODY_LIMIT_OVERHEAD: usize = 1024 * 1024;

/// Build the full application router
pub fn app(state: AppState, max_chunk_bytes: usize) -> Router {
    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .merge(upload::router())
        .layer(DefaultBodyLimit::max(max_chunk_bytes.saturating_add(BODY_LIMIT_OVERHEAD)))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
