use crate::{
    auth::auth::{self, Principal},
    models::{api_error, ApiError, PublishRequest, PublishResponse},
    ws::{event::Event, hub::HubError, scope::Scope},
    AppState,
};
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info};

/// Publish a change event to every connection subscribed to a scope.
///
/// Called by the CRUD layer after a successful write. Delivery is
/// asynchronous: 202 means the hub accepted the event, not that any client
/// received it.
pub async fn publish_event(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(scope): Path<String>,
    Json(request): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {

    let scope = Scope::parse(&scope).map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    auth::ensure_scope_access(&principal, &scope)?;

    let kind = request.kind.trim();
    if kind.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Event kind must not be empty"));
    }

    if state.hub.is_closed() {
        return Err(api_error(StatusCode::SERVICE_UNAVAILABLE, HubError::Closed.to_string()));
    }

    let frame = Event::new(scope.clone(), kind, request.payload).encode().map_err(|e| {
        error!("Failed to encode '{}' for {}: {}", kind, scope, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    state.hub.publish(scope.clone(), frame);
    info!("{} published '{}' to {}", principal.uid, kind, scope);

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse { accepted: true, scope: scope.to_string() }),
    ))
}
