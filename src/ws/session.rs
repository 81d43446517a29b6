use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};
use utoipa::ToSchema;

use super::connection::{ConnId, DisconnectReason};
use super::hub::HubHandle;
use super::scope::Scope;
use crate::db::dbsession::DbSession;

/// Minimum gap between two mirrored activity updates of one connection.
const TOUCH_PERSIST_INTERVAL: Duration = Duration::from_secs(15);

/// Presence row: which user occupies which scope through which connection.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SessionRecord {
    #[schema(value_type = String)]
    pub scope: Scope,
    pub user_id: String,
    #[schema(value_type = String)]
    pub connection_id: String,
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// One change to mirror into the `session` table. Applied in send order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionWrite {
    Upsert(SessionRecord),
    Touch { id: ConnId, at: DateTime<Utc> },
    Leave { id: ConnId, scope: Scope },
    Close { id: ConnId },
}

#[derive(Debug)]
struct ConnSession {
    user_id: String,
    scopes: BTreeMap<Scope, DateTime<Utc>>,
    last_seen: Instant,
    last_active: DateTime<Utc>,
    persisted_at: Instant,
}

impl ConnSession {
    fn records(&self, id: ConnId) -> impl Iterator<Item = SessionRecord> + '_ {
        self.scopes.iter().map(move |(scope, joined_at)| SessionRecord {
            scope: scope.clone(),
            user_id: self.user_id.clone(),
            connection_id: id.to_string(),
            joined_at: *joined_at,
            last_active: self.last_active,
        })
    }

    fn record(&self, id: ConnId, scope: &Scope) -> Option<SessionRecord> {
        let joined_at = self.scopes.get(scope)?;
        Some(SessionRecord {
            scope: scope.clone(),
            user_id: self.user_id.clone(),
            connection_id: id.to_string(),
            joined_at: *joined_at,
            last_active: self.last_active,
        })
    }
}

/// Tracks activity per connection for presence and stale-session reaping.
///
/// Lives outside the hub control loop. The sweep only ever asks the hub to
/// unregister; it never touches membership state itself. When a writer is
/// attached, every change is queued to it while the map lock is held, so the
/// table sees changes in the same order as the map.
#[derive(Clone, Debug)]
pub struct SessionTracker {
    inner: Arc<Mutex<HashMap<ConnId, ConnSession>>>,
    stale_after: Duration,
    writes: Option<mpsc::UnboundedSender<SessionWrite>>,
}

impl SessionTracker {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            stale_after,
            writes: None,
        }
    }

    /// Mirror every change into `writes`.
    pub fn with_writes(mut self, writes: mpsc::UnboundedSender<SessionWrite>) -> Self {
        self.writes = Some(writes);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnId, ConnSession>> {
        // A poisoned map is still structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, write: SessionWrite) {
        if let Some(writes) = &self.writes {
            if let Err(e) = writes.send(write) {
                debug!("Session writer stopped, dropping {:?}", e.0);
            }
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Start tracking a connection together with its initial scopes.
    pub fn open(&self, id: ConnId, user_id: &str, scopes: &[Scope]) {
        let now = Utc::now();
        let session = ConnSession {
            user_id: user_id.to_string(),
            scopes: scopes.iter().map(|s| (s.clone(), now)).collect(),
            last_seen: Instant::now(),
            last_active: now,
            persisted_at: Instant::now(),
        };
        let mut map = self.lock();
        for record in session.records(id) {
            self.persist(SessionWrite::Upsert(record));
        }
        map.insert(id, session);
    }

    /// Record that `id` entered `scope`. Counts as activity.
    pub fn join(&self, id: ConnId, scope: &Scope) {
        let mut map = self.lock();
        let Some(session) = map.get_mut(&id) else {
            return;
        };
        let now = Utc::now();
        session.last_seen = Instant::now();
        session.persisted_at = session.last_seen;
        session.last_active = now;
        session.scopes.entry(scope.clone()).or_insert(now);
        if let Some(record) = session.record(id, scope) {
            self.persist(SessionWrite::Upsert(record));
        }
    }

    pub fn leave(&self, id: ConnId, scope: &Scope) {
        let mut map = self.lock();
        let removed = map
            .get_mut(&id)
            .is_some_and(|session| session.scopes.remove(scope).is_some());
        if removed {
            self.persist(SessionWrite::Leave { id, scope: scope.clone() });
        }
    }

    /// Refresh the activity timestamp of a connection. The table is updated
    /// at most once per `TOUCH_PERSIST_INTERVAL`.
    pub fn touch(&self, id: ConnId) {
        let mut map = self.lock();
        let Some(session) = map.get_mut(&id) else {
            return;
        };
        let now = Instant::now();
        session.last_seen = now;
        session.last_active = Utc::now();
        if now.saturating_duration_since(session.persisted_at) >= TOUCH_PERSIST_INTERVAL {
            session.persisted_at = now;
            self.persist(SessionWrite::Touch { id, at: session.last_active });
        }
    }

    /// Forget a connection and all of its records.
    pub fn close(&self, id: ConnId) {
        let mut map = self.lock();
        if map.remove(&id).is_some() {
            self.persist(SessionWrite::Close { id });
        }
    }

    /// Close the session of `id` once the returned guard goes out of scope.
    pub fn guard(&self, id: ConnId) -> SessionGuard {
        SessionGuard {
            tracker: self.clone(),
            id,
        }
    }

    pub fn presence(&self, scope: &Scope) -> Vec<SessionRecord> {
        let map = self.lock();
        let mut records: Vec<SessionRecord> = map
            .iter()
            .filter_map(|(id, s)| s.record(*id, scope))
            .collect();
        records.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.connection_id.cmp(&b.connection_id)));
        records
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    /// Connections whose last activity is older than the threshold.
    pub fn stale(&self) -> Vec<ConnId> {
        let now = Instant::now();
        self.lock()
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_seen) > self.stale_after)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Reap stale sessions once. Returns the number of connections reaped.
    pub fn sweep(&self, hub: &HubHandle) -> usize {
        let stale = self.stale();
        for id in &stale {
            info!("Reaping stale session {}", id);
            hub.unregister(*id, DisconnectReason::Stale);
            self.close(*id);
        }
        stale.len()
    }

    /// Run `sweep` every `interval` until the hub stops.
    pub fn spawn_sweep(&self, hub: HubHandle, interval: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            info!(
                "Session sweep every {:?}, sessions idle for {:?} are reaped",
                interval,
                tracker.stale_after()
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if hub.is_closed() {
                    break;
                }
                let reaped = tracker.sweep(&hub);
                if reaped > 0 {
                    debug!("Session sweep reaped {} connections", reaped);
                }
            }
            info!("Session sweep stopped");
        })
    }
}

#[must_use = "the session is closed as soon as the guard is dropped"]
pub struct SessionGuard {
    tracker: SessionTracker,
    id: ConnId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.tracker.close(self.id);
    }
}

/// Apply session writes to the database one at a time, in arrival order.
/// Failures are logged and the writer moves on.
pub fn spawn_session_writer(db: Arc<DbSession>) -> (mpsc::UnboundedSender<SessionWrite>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<SessionWrite>();
    let task = tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            let result = match &write {
                SessionWrite::Upsert(record) => db.upsert_session(record).await,
                SessionWrite::Touch { id, at } => db.touch_connection(id.as_uuid(), *at).await,
                SessionWrite::Leave { id, scope } => db.delete_session(id.as_uuid(), scope.as_str()).await,
                SessionWrite::Close { id } => db.delete_connection(id.as_uuid()).await,
            };
            if let Err(e) = result {
                error!("Failed to persist {:?}: {}", write, e);
            }
        }
        debug!("Session writer stopped");
    });
    (tx, task)
}
