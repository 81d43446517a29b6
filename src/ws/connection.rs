use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// One outbound unit. Encoded once per publish and shared by every recipient.
pub type Frame = Arc<[u8]>;

/// Opaque connection handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for ConnId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a connection left the hub. Only used for logging and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Close frame or end of stream from the client.
    ClientClosed,
    /// Read or write failure on the transport.
    Transport,
    /// Outbound queue was full when the hub tried to deliver.
    Backpressure,
    /// Pumps already exited; only a dead handle was left behind.
    Gone,
    /// No activity within the staleness threshold.
    Stale,
    /// Hub control loop is stopping.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::ClientClosed => "client closed",
            DisconnectReason::Transport => "transport error",
            DisconnectReason::Backpressure => "slow consumer",
            DisconnectReason::Gone => "connection gone",
            DisconnectReason::Stale => "stale session",
            DisconnectReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// One live client session.
///
/// The read and write pumps hold the only strong references. The hub keeps a
/// `Weak` so it never extends the lifetime of a connection whose pumps are gone.
#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    user_id: String,
    outbound: mpsc::Sender<Frame>,
    closed: watch::Sender<bool>,
}

impl Connection {
    /// Create a connection with a bounded outbound queue. The receiver half is
    /// meant for the writer pump.
    pub fn new(user_id: impl Into<String>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        let conn = Arc::new(Self {
            id: ConnId::new(),
            user_id: user_id.into(),
            outbound: tx,
            closed,
        });
        (conn, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_live(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Non-blocking enqueue onto the outbound queue.
    pub fn try_send(&self, frame: Frame) -> Result<(), DisconnectReason> {
        if !self.is_live() {
            return Err(DisconnectReason::Gone);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DisconnectReason::Backpressure,
            mpsc::error::TrySendError::Closed(_) => DisconnectReason::Gone,
        })
    }

    /// Close the outbound queue. Returns true only for the call that actually
    /// closed it.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
