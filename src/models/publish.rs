use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Request to publish a change event to a scope
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct PublishRequest {
    pub kind: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Value,
}

/// Response for an accepted publish
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct PublishResponse {
    pub accepted: bool,
    pub scope: String,
}
