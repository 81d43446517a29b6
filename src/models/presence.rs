use serde::Serialize;
use utoipa::ToSchema;

use crate::ws::session::SessionRecord;

/// Sessions currently present in a scope
#[derive(Serialize, ToSchema)]
pub struct PresenceResponse {
    pub scope: String,
    /// Connections the hub currently routes this scope's events to
    pub members: usize,
    pub sessions: Vec<SessionRecord>,
}
