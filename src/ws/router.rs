use super::connection::{ConnId, DisconnectReason, Frame};
use super::registry::Registry;
use super::scope::Scope;

/// Result of delivering one frame to a scope.
#[derive(Debug, Default)]
pub struct FanOut {
    pub delivered: usize,
    /// Recipients that could not take the frame and must be unregistered.
    pub failed: Vec<(ConnId, DisconnectReason)>,
}

/// Enqueue `frame` on every member of `scope` except `except`.
///
/// Never waits on a recipient. A full queue or a dead handle lands in
/// `failed`; other recipients are unaffected. The registry is not modified
/// here so the caller can tear failed connections down through the regular
/// unregister path.
pub fn fan_out(registry: &Registry, scope: &Scope, frame: &Frame, except: Option<ConnId>) -> FanOut {
    let mut out = FanOut::default();
    for (id, handle) in registry.members(scope) {
        if Some(id) == except {
            continue;
        }
        let result = match handle.upgrade() {
            Some(conn) => conn.try_send(frame.clone()),
            None => Err(DisconnectReason::Gone),
        };
        match result {
            Ok(()) => out.delivered += 1,
            Err(reason) => out.failed.push((id, reason)),
        }
    }
    out
}
