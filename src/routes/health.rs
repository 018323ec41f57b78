//! Health check endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    pub active_sessions: usize,
    pub storage_configured: bool,
    pub hash_algorithm: &'static str,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uploads = state.uploads();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "evidence-intake",
        active_sessions: uploads.registry().session_count().await,
        storage_configured: uploads.registry().storage_root().is_ok(),
        hash_algorithm: uploads.algorithm().as_str(),
    })
}
