use chrono::Utc;
use tracing::debug;

use crate::models::{PingMessage, PongMessage, SendMessage};
use crate::websocket::handler::ConnContext;
use crate::ws::connection::DisconnectReason;

/// Handle PingMessage
pub fn handle_ping_message(_ping_msg: &PingMessage, ctx: &ConnContext) -> Result<(), DisconnectReason> {
    // Handle ping message - send a pong message back.
    debug!("Ping message received from {}", ctx.id());

    // Reply with pong
    ctx.reply(SendMessage::Pong(PongMessage { date: Utc::now().to_rfc3339() }))
}
