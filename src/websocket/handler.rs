use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Query, State,
    },
    http::StatusCode,
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::auth::{self, Principal};
use crate::models::{api_error, ApiError, ErrorMessage, ReceivedMessage, SendMessage};
use crate::websocket::msg_broadcast_handler::handle_broadcast_message;
use crate::websocket::msg_ping_handler::handle_ping_message;
use crate::websocket::msg_subscribe_handler::{handle_subscribe_message, handle_unsubscribe_message};
use crate::ws::connection::{ConnId, Connection, DisconnectReason, Frame};
use crate::ws::hub::HubHandle;
use crate::ws::scope::Scope;
use crate::ws::session::SessionTracker;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Comma separated scopes to join right away
    pub scopes: Option<String>,
}

/// Per-connection state owned by the read pump.
pub struct ConnContext {
    pub conn: Arc<Connection>,
    pub principal: Principal,
    pub scopes: HashSet<Scope>,
    pub hub: HubHandle,
    pub sessions: SessionTracker,
}

impl ConnContext {
    pub fn new(
        conn: Arc<Connection>,
        principal: Principal,
        scopes: impl IntoIterator<Item = Scope>,
        hub: HubHandle,
        sessions: SessionTracker,
    ) -> Self {
        Self {
            conn,
            principal,
            scopes: scopes.into_iter().collect(),
            hub,
            sessions,
        }
    }

    pub fn id(&self) -> ConnId {
        self.conn.id()
    }

    /// Queue a direct reply on this connection's outbound queue.
    pub fn reply(&self, msg: SendMessage) -> Result<(), DisconnectReason> {
        let bytes = match serde_json::to_vec(&msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode reply for {}: {}", self.id(), e);
                return Ok(());
            }
        };
        self.conn.try_send(Frame::from(bytes))
    }

    pub fn reply_error(&self, error: impl Into<String>) -> Result<(), DisconnectReason> {
        self.reply(SendMessage::Error(ErrorMessage { error: error.into() }))
    }
}

/// WebSocket handler
pub async fn websocket_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let scopes = match params.scopes.as_deref() {
        Some(raw) => Scope::parse_list(raw).map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?,
        None => Vec::new(),
    };
    for scope in &scopes {
        auth::ensure_scope_access(&principal, scope)?;
    }

    info!("New WebSocket connection attempt from {}", principal.uid);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, principal, scopes)))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, principal: Principal, scopes: Vec<Scope>) {
    let (conn, outbound) = Connection::new(principal.uid.clone(), state.queue_capacity);
    let id = conn.id();
    info!("WebSocket connection {} established for {}", id, principal.uid);

    state.sessions.open(id, &principal.uid, &scopes);
    let _session = state.sessions.guard(id);

    state.hub.register(conn.clone(), scopes.clone());

    let (sink, stream) = socket.split();
    let mut write_task = tokio::spawn(write_pump(conn.clone(), outbound, sink, state.hub.clone()));

    let ctx = ConnContext::new(conn, principal, scopes, state.hub.clone(), state.sessions.clone());
    let mut read_task = tokio::spawn(read_pump(ctx, stream));

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut write_task) => read_task.abort(),
        _ = (&mut read_task) => write_task.abort(),
    };
    info!("WebSocket connection {} terminated", id);
}

fn to_message(frame: &Frame) -> Message {
    match std::str::from_utf8(frame) {
        Ok(text) => Message::Text(text.to_string()),
        Err(_) => Message::Binary(frame.to_vec()),
    }
}

/// Drain the outbound queue into the transport.
///
/// Stops once the connection is closed (after flushing what is already
/// queued) or when the transport rejects a write.
pub async fn write_pump<S>(conn: Arc<Connection>, mut outbound: mpsc::Receiver<Frame>, mut sink: S, hub: HubHandle)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = conn.closed() => break,
        };
        if let Err(e) = sink.send(to_message(&frame)).await {
            warn!("Write to {} failed: {}", conn.id(), e);
            hub.unregister(conn.id(), DisconnectReason::Transport);
            return;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
    debug!("Writer for {} stopped", conn.id());
}

/// Read client frames until the transport closes or the hub discards the
/// connection, then unregister.
pub async fn read_pump<S>(mut ctx: ConnContext, mut stream: S) -> DisconnectReason
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let conn = ctx.conn.clone();
    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = conn.closed() => {
                debug!("Reader for {} stopped, connection was discarded", ctx.id());
                break DisconnectReason::Gone;
            }
            next = stream.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!("Read from {} failed: {}", ctx.id(), e);
                break DisconnectReason::Transport;
            }
            None => break DisconnectReason::ClientClosed,
        };
        ctx.sessions.touch(ctx.id());

        let result = match msg {
            Message::Text(text) => dispatch(&mut ctx, &text).await,
            Message::Close(_) => break DisconnectReason::ClientClosed,
            Message::Binary(_) => {
                debug!("Ignoring binary frame from {}", ctx.id());
                Ok(())
            }
            Message::Ping(_) | Message::Pong(_) => Ok(()),
        };
        if let Err(reason) = result {
            break reason;
        }
    };

    ctx.hub.unregister(ctx.id(), reason);
    reason
}

async fn dispatch(ctx: &mut ConnContext, text: &str) -> Result<(), DisconnectReason> {
    let msg: ReceivedMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            error!("Failed to parse message from {}: {}", ctx.id(), e);
            return ctx.reply_error(format!("Invalid message: {}", e));
        }
    };
    debug!("Received message from {}: {:?}", ctx.id(), msg);

    match msg {
        ReceivedMessage::Subscribe(msg) => handle_subscribe_message(&msg, ctx).await,
        ReceivedMessage::Unsubscribe(msg) => handle_unsubscribe_message(&msg, ctx).await,
        ReceivedMessage::Ping(msg) => handle_ping_message(&msg, ctx),
        ReceivedMessage::Broadcast(msg) => handle_broadcast_message(&msg, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::PrincipalKind;
    use crate::models::BroadcastMessage;
    use crate::ws::hub::Hub;
    use serde_json::Value;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    fn scope(s: &str) -> Scope {
        Scope::parse(s).unwrap()
    }

    fn principal(uid: &str, scopes: Option<&[&str]>) -> Principal {
        Principal {
            uid: uid.to_string(),
            kind: PrincipalKind::User,
            roles: Vec::new(),
            scopes: scopes.map(|s| s.iter().map(|s| s.to_string()).collect()),
            expires_at: i64::MAX,
        }
    }

    fn text(s: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(s.to_string()))
    }

    fn json(frame: Frame) -> Value {
        serde_json::from_slice(&frame).unwrap()
    }

    struct BrokenSink;

    impl Sink<Message> for BrokenSink {
        type Error = std::io::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
            Err(std::io::Error::other("broken pipe"))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Sink that keeps every message it is given.
    #[derive(Default)]
    struct RecordingSink(Vec<Message>);

    impl Sink<Message> for RecordingSink {
        type Error = std::convert::Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            self.get_mut().0.push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    struct Setup {
        hub: HubHandle,
        sessions: SessionTracker,
        conn: Arc<Connection>,
        rx: mpsc::Receiver<Frame>,
        ctx: ConnContext,
    }

    fn setup(p: Principal, scopes: Vec<Scope>) -> Setup {
        let (hub, _task) = Hub::spawn();
        let sessions = SessionTracker::new(Duration::from_secs(90));
        let (conn, rx) = Connection::new(p.uid.clone(), 16);
        hub.register(conn.clone(), scopes.clone());
        sessions.open(conn.id(), &p.uid, &scopes);
        let ctx = ConnContext::new(conn.clone(), p, scopes, hub.clone(), sessions.clone());
        Setup { hub, sessions, conn, rx, ctx }
    }

    #[tokio::test]
    async fn read_pump_answers_ping_and_subscribe_then_unregisters() {
        let mut s = setup(principal("alice", None), vec![scope("proj-1")]);
        let id = s.conn.id();
        let stream = futures_util::stream::iter(vec![
            text(r#"{"type":"ping"}"#),
            text(r#"{"type":"subscribe","scope":"proj-2"}"#),
            Ok(Message::Close(None)),
            text(r#"{"type":"ping"}"#),
        ]);

        let reason = read_pump(s.ctx, stream).await;
        assert_eq!(reason, DisconnectReason::ClientClosed);

        assert_eq!(json(s.rx.recv().await.unwrap())["type"], "pong");
        let subscribed = json(s.rx.recv().await.unwrap());
        assert_eq!(subscribed["type"], "subscribed");
        assert_eq!(subscribed["scope"], "proj-2");
        assert!(s.rx.try_recv().is_err());

        assert_eq!(s.sessions.presence(&scope("proj-2")).len(), 1);
        assert!(s.hub.scopes_of(id).await.unwrap().is_none());
        assert!(!s.conn.is_live());
    }

    #[tokio::test]
    async fn subscribe_rejects_scopes_outside_the_token() {
        let mut s = setup(principal("bob", Some(&["proj-1"])), vec![]);
        let id = s.conn.id();
        // Dispatch directly so the connection stays registered.
        let mut ctx = s.ctx;
        for frame in [
            r#"{"type":"subscribe","scope":"proj-9"}"#,
            r#"{"type":"subscribe","scope":"bad scope"}"#,
            r#"{"type":"subscribe","scope":"proj-1"}"#,
        ] {
            dispatch(&mut ctx, frame).await.unwrap();
        }

        assert_eq!(json(s.rx.recv().await.unwrap())["type"], "error");
        assert_eq!(json(s.rx.recv().await.unwrap())["type"], "error");
        assert_eq!(json(s.rx.recv().await.unwrap())["type"], "subscribed");
        assert_eq!(s.hub.scopes_of(id).await.unwrap(), Some(vec![scope("proj-1")]));
        assert!(ctx.scopes.contains(&scope("proj-1")));
    }

    #[tokio::test]
    async fn unsubscribe_removes_membership_and_presence() {
        let mut s = setup(principal("carol", None), vec![scope("proj-1"), scope("proj-2")]);
        let id = s.conn.id();
        let mut ctx = s.ctx;
        dispatch(&mut ctx, r#"{"type":"unsubscribe","scope":"proj-1"}"#).await.unwrap();

        let reply = json(s.rx.recv().await.unwrap());
        assert_eq!(reply["type"], "unsubscribed");
        assert_eq!(reply["scope"], "proj-1");
        assert_eq!(s.hub.scopes_of(id).await.unwrap(), Some(vec![scope("proj-2")]));
        assert!(s.sessions.presence(&scope("proj-1")).is_empty());
        assert!(!ctx.scopes.contains(&scope("proj-1")));
    }

    #[tokio::test]
    async fn broadcast_reaches_others_but_not_the_sender() {
        let mut s = setup(principal("alice", None), vec![scope("proj-1")]);
        let (other, mut other_rx) = Connection::new("bob", 16);
        s.hub.register(other.clone(), vec![scope("proj-1")]);

        let stream = futures_util::stream::iter(vec![
            text(r#"{"type":"broadcast","scope":"proj-1","kind":"cursorMoved","payload":{"x":3}}"#),
            text(r#"{"type":"broadcast","scope":"proj-7","kind":"cursorMoved"}"#),
        ]);
        let reason = read_pump(s.ctx, stream).await;
        assert_eq!(reason, DisconnectReason::ClientClosed);
        s.hub.stats().await.unwrap();

        let event = json(other_rx.try_recv().unwrap());
        assert_eq!(event["type"], "event");
        assert_eq!(event["kind"], "cursorMoved");
        assert_eq!(event["payload"]["x"], 3);
        assert_eq!(event["sender"], s.conn.id().to_string());

        // Only the rejection for proj-7 comes back to the sender.
        let reply = json(s.rx.try_recv().unwrap());
        assert_eq!(reply["type"], "error");
        assert!(s.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn discarded_connection_cannot_broadcast() {
        let s = setup(principal("alice", None), vec![scope("proj-1")]);
        let (other, mut other_rx) = Connection::new("bob", 16);
        s.hub.register(other.clone(), vec![scope("proj-1")]);

        s.hub.unregister(s.conn.id(), DisconnectReason::Backpressure);
        s.hub.stats().await.unwrap();
        assert!(!s.conn.is_live());

        let msg: BroadcastMessage =
            serde_json::from_str(r#"{"scope":"proj-1","kind":"ghost"}"#).unwrap();
        assert_eq!(handle_broadcast_message(&msg, &s.ctx), Err(DisconnectReason::Gone));

        let stream = futures_util::stream::iter(vec![text(
            r#"{"type":"broadcast","scope":"proj-1","kind":"ghost"}"#,
        )]);
        let reason = read_pump(s.ctx, stream).await;
        assert_eq!(reason, DisconnectReason::Gone);

        let stats = s.hub.stats().await.unwrap();
        assert_eq!(stats.published, 0);
        assert!(other_rx.try_recv().is_err());
        assert_eq!(s.hub.members(scope("proj-1")).await.unwrap(), vec![other.id()]);
    }

    #[tokio::test]
    async fn reader_stops_when_the_hub_discards_the_connection() {
        let s = setup(principal("alice", None), vec![scope("proj-1")]);
        // A client that never sends anything.
        let silent = futures_util::stream::pending::<Result<Message, axum::Error>>();
        let reader = tokio::spawn(read_pump(s.ctx, silent));

        s.hub.unregister(s.conn.id(), DisconnectReason::Stale);
        let reason = tokio::time::timeout(Duration::from_secs(5), reader).await.unwrap().unwrap();
        assert_eq!(reason, DisconnectReason::Gone);
    }

    #[tokio::test]
    async fn malformed_frames_are_reported_and_skipped() {
        let mut s = setup(principal("dave", None), vec![]);
        let stream = futures_util::stream::iter(vec![
            text("not json"),
            text(r#"{"type":"load","id":"x"}"#),
            Ok(Message::Binary(vec![1, 2, 3])),
            text(r#"{"type":"ping"}"#),
        ]);
        let reason = read_pump(s.ctx, stream).await;
        assert_eq!(reason, DisconnectReason::ClientClosed);

        assert_eq!(json(s.rx.recv().await.unwrap())["type"], "error");
        assert_eq!(json(s.rx.recv().await.unwrap())["type"], "error");
        assert_eq!(json(s.rx.recv().await.unwrap())["type"], "pong");
    }

    #[tokio::test]
    async fn read_pump_reports_transport_errors() {
        let s = setup(principal("erin", None), vec![scope("proj-1")]);
        let stream = futures_util::stream::iter(vec![Err(axum::Error::new(std::io::Error::other("reset")))]);
        let reason = read_pump(s.ctx, stream).await;
        assert_eq!(reason, DisconnectReason::Transport);
        assert!(s.hub.members(scope("proj-1")).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_and_stale_clients_leave_the_fan_out() {
        let (hub, _task) = Hub::spawn();
        let tracker = SessionTracker::new(Duration::from_secs(60));
        let (a, mut ra) = Connection::new("alice", 8);
        let (b, mut rb) = Connection::new("bob", 8);
        let (c, mut rc) = Connection::new("carol", 8);
        hub.register(a.clone(), vec![scope("proj-1")]);
        hub.register(b.clone(), vec![scope("proj-1")]);
        hub.register(c.clone(), vec![scope("proj-2")]);
        tracker.open(a.id(), "alice", &[scope("proj-1")]);
        tracker.open(b.id(), "bob", &[scope("proj-1")]);
        tracker.open(c.id(), "carol", &[scope("proj-2")]);

        hub.publish(scope("proj-1"), Frame::from(&b"elementUpdated"[..]));
        assert_eq!(hub.stats().await.unwrap().delivered, 2);
        assert_eq!(&*ra.try_recv().unwrap(), b"elementUpdated");
        assert_eq!(&*rb.try_recv().unwrap(), b"elementUpdated");
        assert!(rc.try_recv().is_err());

        // A's transport breaks under its reader.
        let ctx = ConnContext::new(
            a.clone(),
            principal("alice", None),
            vec![scope("proj-1")],
            hub.clone(),
            tracker.clone(),
        );
        let broken = futures_util::stream::iter(vec![Err(axum::Error::new(std::io::Error::other("reset")))]);
        assert_eq!(read_pump(ctx, broken).await, DisconnectReason::Transport);
        tracker.close(a.id());

        hub.publish(scope("proj-1"), Frame::from(&b"elementAdded"[..]));
        assert_eq!(hub.stats().await.unwrap().delivered, 3);
        assert_eq!(&*rb.try_recv().unwrap(), b"elementAdded");
        assert!(!a.is_live());
        assert_eq!(hub.members(scope("proj-1")).await.unwrap(), vec![b.id()]);

        // B stays active while C goes quiet.
        tokio::time::advance(Duration::from_secs(45)).await;
        tracker.touch(b.id());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(tracker.sweep(&hub), 1);

        hub.publish(scope("proj-2"), Frame::from(&b"elementRemoved"[..]));
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.published, 3);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.connections, 1);
        assert!(rc.try_recv().is_err());
        assert!(!c.is_live());
        assert!(hub.members(scope("proj-2")).await.unwrap().is_empty());
        assert_eq!(tracker.presence(&scope("proj-1")).len(), 1);
        assert!(tracker.presence(&scope("proj-2")).is_empty());
    }

    #[tokio::test]
    async fn write_pump_flushes_queue_then_closes() {
        let (hub, _task) = Hub::spawn();
        let (conn, rx) = Connection::new("alice", 8);
        conn.try_send(Frame::from(&b"{\"type\":\"pong\"}"[..])).unwrap();
        conn.try_send(Frame::from(&[0xffu8, 0x00][..])).unwrap();
        conn.close();

        let mut sink = RecordingSink::default();
        write_pump(conn, rx, &mut sink, hub).await;
        let sent = sink.0;

        assert_eq!(sent.len(), 3);
        assert!(matches!(&sent[0], Message::Text(t) if t == "{\"type\":\"pong\"}"));
        assert!(matches!(&sent[1], Message::Binary(b) if b == &vec![0xffu8, 0x00]));
        assert!(matches!(&sent[2], Message::Close(None)));
    }

    #[tokio::test]
    async fn write_pump_unregisters_on_write_error() {
        let (hub, _task) = Hub::spawn();
        let (conn, rx) = Connection::new("alice", 8);
        hub.register(conn.clone(), vec![scope("proj-1")]);
        conn.try_send(Frame::from(&b"hello"[..])).unwrap();

        write_pump(conn.clone(), rx, BrokenSink, hub.clone()).await;

        assert!(hub.members(scope("proj-1")).await.unwrap().is_empty());
        assert!(!conn.is_live());
    }
}
