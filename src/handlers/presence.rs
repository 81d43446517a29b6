use crate::{
    auth::auth::{self, Principal},
    models::{api_error, ApiError, PresenceResponse},
    ws::scope::Scope,
    AppState,
};
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};

/// List the sessions currently present in a scope
pub async fn presence(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(scope): Path<String>,
) -> Result<Json<PresenceResponse>, ApiError> {
    let scope = Scope::parse(&scope).map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    auth::ensure_scope_access(&principal, &scope)?;

    let members = state
        .hub
        .members(scope.clone())
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok(Json(PresenceResponse {
        scope: scope.to_string(),
        members: members.len(),
        sessions: state.sessions.presence(&scope),
    }))
}
