use axum::{extract::State, http::StatusCode, Json};
use crate::models::{ErrorResponse, HealthResponse};
use crate::state::AppState;
use tracing::debug;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
        service: state.config.server_name.clone(),
    })
}

/// Readiness check endpoint
pub async fn ready_check(State(state): State<AppState>) -> Json<HealthResponse> {
    debug!("Readiness check requested");
    // Rooms are created with the state, so a reachable handler means they are ready.
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Service is ready".to_string(),
        service: state.config.server_name.clone(),
    })
}

/// Fallback for unknown routes
pub async fn not_found() -> (StatusCode, Json<ErrorResponse>) {
    let status = StatusCode::NOT_FOUND;
    (status, Json(ErrorResponse::new(status, "No such route")))
}
