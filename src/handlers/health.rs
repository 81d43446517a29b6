use axum::{extract::State, http::StatusCode, Json};
use crate::db::dbsession;
use crate::models::{HealthResponse, ReadyResponse};
use crate::AppState;
use tracing::{debug, warn};

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint
pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    debug!("Readiness check requested");

    let hub = !state.hub.is_closed();
    let database = match dbsession::get_db() {
        Some(db) => match db.ping().await {
            Ok(_) => Some(true),
            Err(e) => {
                warn!("Database not ready: {}", e);
                Some(false)
            }
        },
        None => None,
    };

    let ready = hub && database.unwrap_or(true);
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(ReadyResponse {
        status: if ready { "ok" } else { "unavailable" }.to_string(),
        hub,
        database,
    }))
}
