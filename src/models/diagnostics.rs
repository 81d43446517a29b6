use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response for diagnostics information
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub n_conn: u32,
    pub n_scopes: u32,
    pub n_memberships: u32,
    pub n_sessions: u32,
    pub n_published: u64,
    pub n_delivered: u64,
    pub n_evicted: u64,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}

/// Scopes a single connection is currently routed to
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ConnectionDiagnosticsResponse {
    pub connection_id: String,
    pub scopes: Vec<String>,
}
