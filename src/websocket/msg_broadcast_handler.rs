use tracing::{debug, error};

use crate::models::BroadcastMessage;
use crate::websocket::handler::ConnContext;
use crate::ws::connection::DisconnectReason;
use crate::ws::event::Event;
use crate::ws::scope::Scope;

/// Handle a client-originated change. It is relayed to the other members of
/// the scope; the sender does not get its own event back.
pub fn handle_broadcast_message(msg: &BroadcastMessage, ctx: &ConnContext) -> Result<(), DisconnectReason> {
    // The hub no longer routes for a discarded connection, so neither may it.
    if !ctx.conn.is_live() {
        return Err(DisconnectReason::Gone);
    }
    let scope = match Scope::parse(&msg.scope) {
        Ok(scope) => scope,
        Err(e) => return ctx.reply_error(format!("Invalid scope '{}': {}", msg.scope, e)),
    };
    if !ctx.scopes.contains(&scope) {
        return ctx.reply_error(format!("Not subscribed to scope '{}'", scope));
    }
    let kind = msg.kind.trim();
    if kind.is_empty() {
        return ctx.reply_error("Event kind must not be empty");
    }

    let event = Event::new(scope, kind, msg.payload.clone()).from_connection(ctx.id());
    if let Err(e) = ctx.hub.publish_event(&event) {
        error!("Failed to relay '{}' from {}: {}", kind, ctx.id(), e);
        return Err(DisconnectReason::Shutdown);
    }
    debug!("Relayed '{}' from {} to {}", kind, ctx.id(), event.scope);
    Ok(())
}
