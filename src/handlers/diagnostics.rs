use crate::{
    auth::auth::{self, Principal},
    models::{api_error, ApiError, ConnectionDiagnosticsResponse, DiagnosticsResponse},
    ws::connection::ConnId,
    AppState,
};
use axum::{extract::{Extension, Path, State}, http::StatusCode, Json};
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::{error, info};

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Hub and process diagnostics
pub async fn diagnostics(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), ApiError> {

    // Ensure the caller is a service or an admin
    auth::ensure_service_or_admin(&principal)?;

    // Ask the control loop for its counters
    let stats = match state.hub.stats().await {
        Ok(stats) => stats,
        Err(e) => {
            error!("Failed to read hub stats: {}", e);
            return Err(api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()));
        }
    };

    let n_sessions = state.sessions.connection_count() as u32;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0)
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Scopes: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        stats.connections,
        stats.scopes
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn: stats.connections as u32,
            n_scopes: stats.scopes as u32,
            n_memberships: stats.memberships as u32,
            n_sessions,
            n_published: stats.published,
            n_delivered: stats.delivered,
            n_evicted: stats.evicted,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}

/// Scopes a single connection is routed to
pub async fn connection_diagnostics(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(connection_id): Path<uuid::Uuid>,
) -> Result<Json<ConnectionDiagnosticsResponse>, ApiError> {
    auth::ensure_service_or_admin(&principal)?;

    let scopes = state
        .hub
        .scopes_of(ConnId::from(connection_id))
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Connection {} is not registered", connection_id)))?;

    Ok(Json(ConnectionDiagnosticsResponse {
        connection_id: connection_id.to_string(),
        scopes: scopes.into_iter().map(String::from).collect(),
    }))
}
