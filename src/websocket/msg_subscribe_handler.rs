use tracing::{error, info, warn};

use crate::models::{ScopeMessage, SendMessage};
use crate::websocket::handler::ConnContext;
use crate::ws::connection::DisconnectReason;
use crate::ws::scope::Scope;

/// Handle a subscribe request. The acknowledgement is only queued once the
/// hub has applied the membership.
pub async fn handle_subscribe_message(msg: &ScopeMessage, ctx: &mut ConnContext) -> Result<(), DisconnectReason> {
    let scope = match Scope::parse(&msg.scope) {
        Ok(scope) => scope,
        Err(e) => return ctx.reply_error(format!("Invalid scope '{}': {}", msg.scope, e)),
    };
    if !ctx.principal.can_access(&scope) {
        warn!("{} denied access to scope {}", ctx.principal.uid, scope);
        return ctx.reply_error(format!("Access to scope '{}' denied", scope));
    }

    match ctx.hub.subscribe(ctx.id(), scope.clone()).await {
        Ok(true) => {}
        Ok(false) => {
            // No longer registered, the connection is being torn down.
            return Err(DisconnectReason::Gone);
        }
        Err(e) => {
            error!("Subscribe of {} to {} failed: {}", ctx.id(), scope, e);
            return Err(DisconnectReason::Shutdown);
        }
    }

    ctx.scopes.insert(scope.clone());
    ctx.sessions.join(ctx.id(), &scope);
    info!("Connection {} joined scope {}", ctx.id(), scope);
    ctx.reply(SendMessage::Subscribed(ScopeMessage { scope: scope.to_string() }))
}

/// Handle an unsubscribe request. Leaving a scope that was never joined is
/// still acknowledged.
pub async fn handle_unsubscribe_message(msg: &ScopeMessage, ctx: &mut ConnContext) -> Result<(), DisconnectReason> {
    let scope = match Scope::parse(&msg.scope) {
        Ok(scope) => scope,
        Err(e) => return ctx.reply_error(format!("Invalid scope '{}': {}", msg.scope, e)),
    };

    if let Err(e) = ctx.hub.unsubscribe(ctx.id(), scope.clone()).await {
        error!("Unsubscribe of {} from {} failed: {}", ctx.id(), scope, e);
        return Err(DisconnectReason::Shutdown);
    }

    ctx.scopes.remove(&scope);
    ctx.sessions.leave(ctx.id(), &scope);
    info!("Connection {} left scope {}", ctx.id(), scope);
    ctx.reply(SendMessage::Unsubscribed(ScopeMessage { scope: scope.to_string() }))
}
