use chrono::Utc;
use serde_json::Value;

use super::connection::{ConnId, Frame};
use super::scope::Scope;
use crate::models::{EventMessage, SendMessage};

/// A scoped change notification. Immutable once published.
#[derive(Debug, Clone)]
pub struct Event {
    pub scope: Scope,
    pub kind: String,
    pub payload: Value,
    /// Originating connection when a client echoed the change itself.
    pub sender: Option<ConnId>,
}

impl Event {
    pub fn new(scope: Scope, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            scope,
            kind: kind.into(),
            payload,
            sender: None,
        }
    }

    pub fn from_connection(mut self, id: ConnId) -> Self {
        self.sender = Some(id);
        self
    }

    /// Encode into the wire frame delivered to subscribers.
    pub fn encode(&self) -> Result<Frame, serde_json::Error> {
        let msg = SendMessage::Event(EventMessage {
            scope: self.scope.to_string(),
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            sender: self.sender.map(|id| id.to_string()),
            at: Utc::now().to_rfc3339(),
        });
        Ok(Frame::from(serde_json::to_vec(&msg)?))
    }
}
