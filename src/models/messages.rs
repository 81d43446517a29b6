use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScopeMessage {
    pub scope: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    pub scope: String,
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PingMessage {}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub scope: String,
    pub kind: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub at: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PongMessage {
    pub date: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub error: String,
}

/// Frames a client may send over the socket.
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "subscribe")]
    Subscribe(ScopeMessage),
    #[serde(rename = "unsubscribe")]
    Unsubscribe(ScopeMessage),
    #[serde(rename = "ping")]
    Ping(PingMessage),
    #[serde(rename = "broadcast")]
    Broadcast(BroadcastMessage),
}

/// Frames the server writes to a client.
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum SendMessage {
    #[serde(rename = "event")]
    Event(EventMessage),
    #[serde(rename = "pong")]
    Pong(PongMessage),
    #[serde(rename = "subscribed")]
    Subscribed(ScopeMessage),
    #[serde(rename = "unsubscribed")]
    Unsubscribed(ScopeMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}
