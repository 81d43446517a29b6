use utoipa::OpenApi;
use crate::models::*;
use crate::ws::session::SessionRecord;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Hub and database are ready", body = ReadyResponse),
        (status = 503, description = "Hub stopped or database unreachable", body = ReadyResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Open a WebSocket connection, optionally joining scopes right away
#[utoipa::path(
    get,
    path = "/api/v1/ws",
    params(
        ("scopes" = Option<String>, Query, description = "Comma separated scopes to join"),
        ("token" = Option<String>, Query, description = "Bearer token for clients that cannot set headers")
    ),
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 400, description = "Invalid scope", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Scope not granted by the token", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn websocket_doc() {}

/// Publish a change event to every subscriber of a scope
#[utoipa::path(
    post,
    path = "/api/v1/scopes/{scope}/events",
    params(
        ("scope" = String, Path, description = "Scope identifier, e.g. a project id")
    ),
    request_body = PublishRequest,
    responses(
        (status = 202, description = "Event accepted for delivery", body = PublishResponse),
        (status = 400, description = "Invalid scope or event kind", body = ErrorResponse),
        (status = 403, description = "Scope not granted by the token", body = ErrorResponse),
        (status = 503, description = "Hub not running", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn publish_event_doc() {}

/// List the sessions present in a scope
#[utoipa::path(
    get,
    path = "/api/v1/scopes/{scope}/presence",
    params(
        ("scope" = String, Path, description = "Scope identifier")
    ),
    responses(
        (status = 200, description = "Current sessions", body = PresenceResponse),
        (status = 403, description = "Scope not granted by the token", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn presence_doc() {}

/// Hub counters and process resources
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics snapshot", body = DiagnosticsResponse),
        (status = 403, description = "Service or admin token required", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Scopes a single connection is routed to
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics/connections/{id}",
    params(
        ("id" = String, Path, description = "Connection id")
    ),
    responses(
        (status = 200, description = "Connection scopes", body = ConnectionDiagnosticsResponse),
        (status = 403, description = "Service or admin token required", body = ErrorResponse),
        (status = 404, description = "Connection not registered", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn connection_diagnostics_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        websocket_doc,
        publish_event_doc,
        presence_doc,
        diagnostics_doc,
        connection_diagnostics_doc,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            PublishRequest,
            PublishResponse,
            PresenceResponse,
            SessionRecord,
            DiagnosticsResponse,
            ConnectionDiagnosticsResponse,
            ErrorResponse
        )
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
