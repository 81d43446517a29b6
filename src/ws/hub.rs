use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{ConnId, Connection, DisconnectReason, Frame};
use super::event::Event;
use super::registry::Registry;
use super::router::fan_out;
use super::scope::Scope;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub control loop is not running")]
    Closed,
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Point-in-time counters of the control loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub connections: usize,
    pub scopes: usize,
    pub memberships: usize,
    pub published: u64,
    pub delivered: u64,
    pub evicted: u64,
}

/// Everything the control loop reacts to. One queue gives one total order.
enum HubCommand {
    Register {
        conn: Arc<Connection>,
        scopes: Vec<Scope>,
    },
    Unregister {
        id: ConnId,
        reason: DisconnectReason,
    },
    Subscribe {
        id: ConnId,
        scope: Scope,
        reply: oneshot::Sender<bool>,
    },
    Unsubscribe {
        id: ConnId,
        scope: Scope,
        reply: oneshot::Sender<bool>,
    },
    Publish {
        scope: Scope,
        frame: Frame,
        except: Option<ConnId>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Members {
        scope: Scope,
        reply: oneshot::Sender<Vec<ConnId>>,
    },
    ScopesOf {
        id: ConnId,
        reply: oneshot::Sender<Option<Vec<Scope>>>,
    },
    Shutdown,
}

/// Cheap, cloneable entry point to the hub.
///
/// Mutations are fire-and-forget and never block the caller. Queries wait for
/// the control loop to answer and fail with [`HubError::Closed`] once it exited.
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl std::fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HubCommand::Register { .. } => "Register",
            HubCommand::Unregister { .. } => "Unregister",
            HubCommand::Subscribe { .. } => "Subscribe",
            HubCommand::Unsubscribe { .. } => "Unsubscribe",
            HubCommand::Publish { .. } => "Publish",
            HubCommand::Stats { .. } => "Stats",
            HubCommand::Members { .. } => "Members",
            HubCommand::ScopesOf { .. } => "ScopesOf",
            HubCommand::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl HubHandle {
    fn send(&self, cmd: HubCommand) {
        if let Err(e) = self.tx.send(cmd) {
            debug!("Hub is not running, dropping {:?}", e.0);
        }
    }

    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> Result<T, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Add a connection with its initial scopes.
    pub fn register(&self, conn: Arc<Connection>, scopes: Vec<Scope>) {
        self.send(HubCommand::Register { conn, scopes });
    }

    /// Remove a connection from every scope and close its outbound queue.
    pub fn unregister(&self, id: ConnId, reason: DisconnectReason) {
        self.send(HubCommand::Unregister { id, reason });
    }

    /// Returns false if the connection is not registered.
    pub async fn subscribe(&self, id: ConnId, scope: Scope) -> Result<bool, HubError> {
        self.ask(|reply| HubCommand::Subscribe { id, scope, reply }).await
    }

    /// Returns false if there was no such membership.
    pub async fn unsubscribe(&self, id: ConnId, scope: Scope) -> Result<bool, HubError> {
        self.ask(|reply| HubCommand::Unsubscribe { id, scope, reply }).await
    }

    /// Deliver an opaque frame to every member of `scope`.
    pub fn publish(&self, scope: Scope, frame: Frame) {
        self.send(HubCommand::Publish {
            scope,
            frame,
            except: None,
        });
    }

    /// Encode and publish an event. A client-originated event is not echoed
    /// back to its sender.
    pub fn publish_event(&self, event: &Event) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }
        let frame = event.encode()?;
        self.send(HubCommand::Publish {
            scope: event.scope.clone(),
            frame,
            except: event.sender,
        });
        Ok(())
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        self.ask(|reply| HubCommand::Stats { reply }).await
    }

    pub async fn members(&self, scope: Scope) -> Result<Vec<ConnId>, HubError> {
        self.ask(|reply| HubCommand::Members { scope, reply }).await
    }

    pub async fn scopes_of(&self, id: ConnId) -> Result<Option<Vec<Scope>>, HubError> {
        self.ask(|reply| HubCommand::ScopesOf { id, reply }).await
    }

    pub fn shutdown(&self) {
        self.send(HubCommand::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The hub control loop. Owns the membership registry; nothing else touches it.
pub struct Hub {
    registry: Registry,
    rx: mpsc::UnboundedReceiver<HubCommand>,
    published: u64,
    delivered: u64,
    evicted: u64,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            registry: Registry::new(),
            rx,
            published: 0,
            delivered: 0,
            evicted: 0,
        };
        (hub, HubHandle { tx })
    }

    /// Start the control loop on the runtime.
    pub fn spawn() -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Hub::new();
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    /// Process commands in arrival order until shutdown or until every
    /// handle has been dropped.
    pub async fn run(mut self) {
        info!("Hub control loop started");
        while let Some(cmd) = self.rx.recv().await {
            if !self.handle(cmd) {
                break;
            }
        }
        self.rx.close();
        let ids: Vec<ConnId> = self.registry.ids().collect();
        for id in ids {
            self.unregister(id, DisconnectReason::Shutdown);
        }
        info!("Hub control loop stopped");
    }

    fn handle(&mut self, cmd: HubCommand) -> bool {
        match cmd {
            HubCommand::Register { conn, scopes } => self.register(conn, scopes),
            HubCommand::Unregister { id, reason } => self.unregister(id, reason),
            HubCommand::Subscribe { id, scope, reply } => {
                let added = self.registry.subscribe(id, scope);
                let _ = reply.send(added);
            }
            HubCommand::Unsubscribe { id, scope, reply } => {
                let removed = self.registry.unsubscribe(id, &scope);
                let _ = reply.send(removed);
            }
            HubCommand::Publish { scope, frame, except } => self.publish(scope, frame, except),
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            HubCommand::Members { scope, reply } => {
                let mut ids: Vec<ConnId> = self.registry.members(&scope).map(|(id, _)| id).collect();
                ids.sort();
                let _ = reply.send(ids);
            }
            HubCommand::ScopesOf { id, reply } => {
                let _ = reply.send(self.registry.scopes_of(id));
            }
            HubCommand::Shutdown => return false,
        }
        true
    }

    fn register(&mut self, conn: Arc<Connection>, scopes: Vec<Scope>) {
        if !conn.is_live() {
            debug!("Ignoring registration of closed connection {}", conn.id());
            return;
        }
        if self.registry.insert(&conn, scopes) {
            info!(
                "Client {} (user {}) connected. Total clients: {}",
                conn.id(),
                conn.user_id(),
                self.registry.connection_count()
            );
        } else {
            debug!("Connection {} registered again, scopes merged", conn.id());
        }
    }

    fn unregister(&mut self, id: ConnId, reason: DisconnectReason) {
        let Some(member) = self.registry.remove(id) else {
            return;
        };
        if let Some(conn) = member.handle.upgrade() {
            conn.close();
        }
        info!(
            "Client {} (user {}) disconnected ({}). Total clients: {}",
            id,
            member.user_id,
            reason,
            self.registry.connection_count()
        );
    }

    fn publish(&mut self, scope: Scope, frame: Frame, except: Option<ConnId>) {
        self.published += 1;
        let out = fan_out(&self.registry, &scope, &frame, except);
        self.delivered += out.delivered as u64;
        debug!("Broadcasting to {} clients in scope {}", out.delivered, scope);
        for (id, reason) in out.failed {
            if reason == DisconnectReason::Backpressure {
                warn!("Client {} disconnected due to slow connection", id);
                self.evicted += 1;
            }
            self.unregister(id, reason);
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.connection_count(),
            scopes: self.registry.scope_count(),
            memberships: self.registry.membership_count(),
            published: self.published,
            delivered: self.delivered,
            evicted: self.evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn scope(s: &str) -> Scope {
        Scope::parse(s).unwrap()
    }

    fn frame(s: &str) -> Frame {
        Arc::from(s.as_bytes())
    }

    #[tokio::test]
    async fn register_and_query_scopes() {
        let (hub, _task) = Hub::spawn();
        let (a, _ra) = Connection::new("a", 8);
        hub.register(a.clone(), vec![scope("proj-1"), scope("team-1")]);

        let scopes = hub.scopes_of(a.id()).await.unwrap().unwrap();
        assert_eq!(scopes, vec![scope("proj-1"), scope("team-1")]);
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.memberships, 2);
    }

    #[tokio::test]
    async fn register_twice_is_idempotent() {
        let (hub, _task) = Hub::spawn();
        let (a, _ra) = Connection::new("a", 8);
        hub.register(a.clone(), vec![scope("proj-1")]);
        hub.register(a.clone(), vec![scope("proj-1")]);
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.memberships, 1);
    }

    #[tokio::test]
    async fn publish_reaches_exactly_the_members() {
        let (hub, _task) = Hub::spawn();
        let (a, mut ra) = Connection::new("a", 8);
        let (b, mut rb) = Connection::new("b", 8);
        let (c, mut rc) = Connection::new("c", 8);
        hub.register(a.clone(), vec![scope("proj-1")]);
        hub.register(b.clone(), vec![scope("proj-1")]);
        hub.register(c.clone(), vec![scope("proj-2")]);

        hub.publish(scope("proj-1"), frame("elementUpdated"));
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.delivered, 2);

        assert_eq!(&*ra.recv().await.unwrap(), b"elementUpdated");
        assert_eq!(&*rb.recv().await.unwrap(), b"elementUpdated");
        assert!(rc.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_closes_queue() {
        let (hub, _task) = Hub::spawn();
        let (a, _ra) = Connection::new("a", 8);
        hub.register(a.clone(), vec![scope("proj-1")]);

        hub.unregister(a.id(), DisconnectReason::ClientClosed);
        let once = hub.stats().await.unwrap();
        hub.unregister(a.id(), DisconnectReason::ClientClosed);
        let twice = hub.stats().await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(once.connections, 0);
        assert_eq!(once.scopes, 0);
        assert!(!a.is_live());
        assert!(hub.members(scope("proj-1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_consumer_is_sacrificed() {
        let (hub, _task) = Hub::spawn();
        let (slow, _slow_rx) = Connection::new("slow", 1);
        let (fast, mut fast_rx) = Connection::new("fast", 8);
        hub.register(slow.clone(), vec![scope("s"), scope("other")]);
        hub.register(fast.clone(), vec![scope("s")]);

        hub.publish(scope("s"), frame("1"));
        hub.publish(scope("s"), frame("2"));

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.connections, 1);
        assert!(!slow.is_live());
        assert_eq!(hub.scopes_of(slow.id()).await.unwrap(), None);
        assert!(hub.members(scope("other")).await.unwrap().is_empty());
        assert_eq!(hub.members(scope("s")).await.unwrap(), vec![fast.id()]);

        assert_eq!(&*fast_rx.recv().await.unwrap(), b"1");
        assert_eq!(&*fast_rx.recv().await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn dropped_connection_is_pruned_on_publish() {
        let (hub, _task) = Hub::spawn();
        let (a, ra) = Connection::new("a", 8);
        let id = a.id();
        hub.register(a, vec![scope("s")]);
        // Make sure the registration (and its strong reference) went through.
        assert_eq!(hub.members(scope("s")).await.unwrap(), vec![id]);
        drop(ra);

        hub.publish(scope("s"), frame("x"));
        assert!(hub.members(scope("s")).await.unwrap().is_empty());
        assert_eq!(hub.stats().await.unwrap().evicted, 0);
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe() {
        let (hub, _task) = Hub::spawn();
        let (a, mut ra) = Connection::new("a", 8);
        hub.register(a.clone(), vec![]);

        assert!(hub.subscribe(a.id(), scope("proj-9")).await.unwrap());
        hub.publish(scope("proj-9"), frame("hello"));
        assert_eq!(&*ra.recv().await.unwrap(), b"hello");

        assert!(hub.unsubscribe(a.id(), scope("proj-9")).await.unwrap());
        assert!(!hub.unsubscribe(a.id(), scope("proj-9")).await.unwrap());
        hub.publish(scope("proj-9"), frame("bye"));
        hub.stats().await.unwrap();
        assert!(ra.try_recv().is_err());
        assert!(a.is_live());
    }

    #[tokio::test]
    async fn subscribe_unknown_connection_returns_false() {
        let (hub, _task) = Hub::spawn();
        let (a, _ra) = Connection::new("a", 8);
        assert!(!hub.subscribe(a.id(), scope("proj-1")).await.unwrap());
    }

    #[tokio::test]
    async fn publish_event_skips_sender() {
        let (hub, _task) = Hub::spawn();
        let (a, mut ra) = Connection::new("a", 8);
        let (b, mut rb) = Connection::new("b", 8);
        hub.register(a.clone(), vec![scope("proj-1")]);
        hub.register(b.clone(), vec![scope("proj-1")]);

        let event = Event::new(scope("proj-1"), "elementMoved", json!({"x": 10})).from_connection(a.id());
        hub.publish_event(&event).unwrap();
        hub.stats().await.unwrap();

        assert!(ra.try_recv().is_err());
        let got: Value = serde_json::from_slice(&rb.try_recv().unwrap()).unwrap();
        assert_eq!(got["kind"], "elementMoved");
        assert_eq!(got["payload"]["x"], 10);
    }

    #[tokio::test]
    async fn per_scope_order_is_preserved() {
        let (hub, _task) = Hub::spawn();
        let (a, mut ra) = Connection::new("a", 64);
        let (b, mut rb) = Connection::new("b", 64);
        hub.register(a.clone(), vec![scope("s")]);
        hub.register(b.clone(), vec![scope("s")]);

        for i in 0..32 {
            hub.publish(scope("s"), frame(&i.to_string()));
        }
        hub.stats().await.unwrap();
        for i in 0..32 {
            let expected = i.to_string();
            assert_eq!(&*ra.try_recv().unwrap(), expected.as_bytes());
            assert_eq!(&*rb.try_recv().unwrap(), expected.as_bytes());
        }
    }

    #[tokio::test]
    async fn shutdown_closes_remaining_connections() {
        let (hub, task) = Hub::spawn();
        let (a, _ra) = Connection::new("a", 8);
        hub.register(a.clone(), vec![scope("s")]);
        hub.shutdown();
        task.await.unwrap();

        assert!(!a.is_live());
        assert!(hub.is_closed());
        assert!(matches!(hub.stats().await, Err(HubError::Closed)));
        let event = Event::new(scope("s"), "x", Value::Null);
        assert!(matches!(hub.publish_event(&event), Err(HubError::Closed)));
    }

    #[tokio::test]
    async fn concurrent_churn_settles_consistently() {
        let (hub, _task) = Hub::spawn();
        let mut workers = Vec::new();
        for w in 0..8 {
            let hub = hub.clone();
            workers.push(tokio::spawn(async move {
                let mut kept = Vec::new();
                for i in 0..50 {
                    let (conn, rx) = Connection::new(format!("u{w}"), 4);
                    hub.register(conn.clone(), vec![scope(&format!("p{}", i % 3))]);
                    hub.publish(scope(&format!("p{}", (i + 1) % 3)), frame("tick"));
                    if i % 2 == 0 {
                        hub.unregister(conn.id(), DisconnectReason::ClientClosed);
                    } else {
                        kept.push((conn, rx));
                    }
                    tokio::task::yield_now().await;
                }
                kept
            }));
        }
        let mut survivors = Vec::new();
        for w in workers {
            survivors.extend(w.await.unwrap());
        }

        let stats = hub.stats().await.unwrap();
        let mut total_memberships = 0;
        for (conn, _rx) in &survivors {
            if let Some(scopes) = hub.scopes_of(conn.id()).await.unwrap() {
                for s in &scopes {
                    assert!(hub.members(s.clone()).await.unwrap().contains(&conn.id()));
                }
                total_memberships += scopes.len();
            } else {
                // evicted by backpressure
                assert!(!conn.is_live());
            }
        }
        assert_eq!(stats.memberships, total_memberships);
        assert_eq!(stats.connections + stats.evicted as usize, survivors.len());
    }
}
