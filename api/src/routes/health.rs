use axum::extract::State;
use axum::{Json, Router, routing::get};

use crate::HealthResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check endpoint with live session and connection counts
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = match state.store.get_stats().await {
        Ok(stats) => stats.session_count,
        Err(err) => {
            tracing::warn!(error = %err, "session stats unavailable");
            0
        }
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol_version: lri_core::config::PROTOCOL_VERSION.to_string(),
        sessions,
        connections: state.connections.connections().await.len(),
    })
}
