use crate::{
    handlers::{connection_diagnostics, diagnostics, health_check, presence, publish_event, ready_check},
    routes::auth_middleware::auth_middleware,
    websocket::handler::websocket_handler,
    AppState,
};
use axum::{middleware, routing::{get, post}, Router};

/// Create API routes
pub fn create_api_routes(state: AppState) -> Router {
    let protected = Router::<AppState>::new()
        .route("/v1/ws", get(websocket_handler))
        .route("/v1/scopes/:scope/events", post(publish_event))
        .route("/v1/scopes/:scope/presence", get(presence))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/diagnostics/connections/:id", get(connection_diagnostics))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)); // Applies to all routes added above

    Router::<AppState>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .merge(protected)
        .with_state(state)
}
