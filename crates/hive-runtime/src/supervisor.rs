//! Connection Supervisor
//!
//! Owns the registry of live sessions and drives each one through its
//! lifecycle:
//!
//! ```text
//! absent -> connecting -> (awaiting scan)* -> open -> closed
//!                ^                                     |
//!                +------ reconnect after delay --------+  (unless logged out)
//! ```
//!
//! State transitions for one session are serialized by a per-session async
//! lock; different sessions proceed in parallel. Each live socket gets one
//! event task that consumes the engine's event channel in order. Events from a
//! socket that has since been replaced are recognized by connection id and
//! ignored for lifecycle purposes. When an event task stops, credential
//! updates still queued on its channel are persisted before it exits.

use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hive_core::{
    ChatModification, ConnectionPhase, ConnectionUpdate, EngineEvent, HiveConfig, HiveError,
    HiveResult, OutgoingMessage, ProtocolEngine, ProtocolSocket, SessionId, SessionRecord,
    SessionStatus, Storage, SupervisorConfig,
};

use crate::auth_store::AuthStateStore;
use crate::history::HistoryIngestor;

// ----------------------------------------------------------------------------
// Registry Types
// ----------------------------------------------------------------------------

/// Registry entry of one live session
struct LiveSession {
    /// Identifies the socket this entry was created for
    connection_id: Uuid,
    socket: Arc<dyn ProtocolSocket>,
    status: SessionStatus,
    qr: Option<String>,
    last_connected: Option<DateTime<Utc>>,
    events: Option<EventTask>,
}

impl LiveSession {
    fn record(&self, id: &SessionId) -> SessionRecord {
        SessionRecord {
            id: id.clone(),
            status: self.status,
            qr_code: self.qr.clone(),
            last_connected: self.last_connected,
        }
    }
}

/// Task consuming one socket's event channel
struct EventTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl EventTask {
    /// Stop the task and wait until queued credentials are saved
    ///
    /// Never call with the session lock held; the task may be waiting on it.
    async fn finish(self, id: &SessionId) {
        let _ = self.stop.send(());
        if let Err(err) = self.handle.await {
            warn!(session = %id, error = %err, "event task failed");
        }
    }

    /// Stop the task without saving anything still queued
    async fn cancel(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

/// What an event task does with events left on its channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leftovers {
    SaveCredentials,
    Discard,
}

/// Pending reconnect attempt
struct ReconnectTimer {
    token: Uuid,
    handle: JoinHandle<()>,
}

/// Snapshot of one live session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    pub status: SessionStatus,
    pub has_qr: bool,
    pub last_connected: Option<DateTime<Utc>>,
}

// ----------------------------------------------------------------------------
// Connection Supervisor
// ----------------------------------------------------------------------------

/// Supervises every protocol session of this process
///
/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn ProtocolEngine>,
    storage: Arc<dyn Storage>,
    history: Arc<HistoryIngestor>,
    config: SupervisorConfig,
    fragment_keys: Vec<String>,
    sessions: DashMap<SessionId, LiveSession>,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
    timers: DashMap<SessionId, ReconnectTimer>,
    auth_stores: DashMap<SessionId, Arc<AuthStateStore>>,
}

impl ConnectionSupervisor {
    /// Create a supervisor over an engine and a store
    pub fn new(
        engine: Arc<dyn ProtocolEngine>,
        storage: Arc<dyn Storage>,
        config: &HiveConfig,
    ) -> Self {
        let history = Arc::new(HistoryIngestor::new(
            storage.clone(),
            config.history.chunk_size,
        ));
        Self {
            inner: Arc::new(Inner {
                engine,
                storage,
                history,
                config: config.supervisor.clone(),
                fragment_keys: config.auth.fragment_keys.clone(),
                sessions: DashMap::new(),
                locks: DashMap::new(),
                timers: DashMap::new(),
                auth_stores: DashMap::new(),
            }),
        }
    }

    /// The history ingestor fed by this supervisor
    pub fn history(&self) -> &Arc<HistoryIngestor> {
        &self.inner.history
    }

    /// The auth store of a session
    pub fn auth_store(&self, id: &SessionId) -> Arc<AuthStateStore> {
        self.inner.auth_store(id)
    }

    // ------------------------------------------------------------------------
    // Lifecycle Operations
    // ------------------------------------------------------------------------

    /// Open a socket for a session unless one is already live
    pub async fn connect(&self, id: &SessionId) -> HiveResult<()> {
        let lock = self.inner.session_lock(id);
        let _guard = lock.lock().await;
        self.inner.cancel_timer(id);
        self.inner.connect_locked(id).await
    }

    /// Close a session's socket and forget it; idempotent
    pub async fn disconnect(&self, id: &SessionId) -> HiveResult<()> {
        let events = {
            let lock = self.inner.session_lock(id);
            let _guard = lock.lock().await;
            self.inner.cancel_timer(id);

            self.inner.teardown_locked(id).await.and_then(|mut live| {
                self.inner.persist(&SessionRecord {
                    status: SessionStatus::Close,
                    qr_code: None,
                    ..live.record(id)
                });
                info!(session = %id, "session disconnected");
                live.events.take()
            })
        };

        if let Some(events) = events {
            events.finish(id).await;
        }
        self.inner.prune_lock(id);
        Ok(())
    }

    /// Register a new session and connect it
    pub async fn create(&self, id: &SessionId) -> HiveResult<()> {
        let lock = self.inner.session_lock(id);
        let _guard = lock.lock().await;

        if self.inner.sessions.contains_key(id) || self.inner.storage.get_session(id)?.is_some() {
            return Err(HiveError::session_exists(id.as_str()));
        }
        self.inner
            .storage
            .upsert_session(&SessionRecord::new(id.clone()))?;
        info!(session = %id, "session created");
        self.inner.connect_locked(id).await
    }

    /// Disconnect a session and purge everything stored for it
    pub async fn delete(&self, id: &SessionId) -> HiveResult<()> {
        let deleted = {
            let lock = self.inner.session_lock(id);
            let _guard = lock.lock().await;
            self.inner.delete_locked(id).await
        };
        self.inner.prune_lock(id);
        deleted?;
        info!(session = %id, "session deleted");
        Ok(())
    }

    /// Connect every persisted session that has stored credentials
    ///
    /// Returns the number of sessions connected.
    pub async fn resume_all(&self) -> HiveResult<usize> {
        if !self.inner.config.resume_on_start {
            debug!("session resume disabled");
            return Ok(0);
        }

        let mut candidates = Vec::new();
        for record in self.inner.storage.list_sessions()? {
            if self.inner.auth_store(&record.id).has_credentials().await? {
                candidates.push(record.id);
            }
        }

        let results = join_all(candidates.iter().map(|id| self.connect(id))).await;
        let mut resumed = 0;
        for (id, result) in candidates.iter().zip(results) {
            match result {
                Ok(()) => resumed += 1,
                Err(err) => warn!(session = %id, error = %err, "failed to resume session"),
            }
        }
        info!(resumed, candidates = candidates.len(), "resumed sessions");
        Ok(resumed)
    }

    /// Disconnect every live session and cancel every pending reconnect
    pub async fn shutdown(&self) {
        let mut ids: Vec<SessionId> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.extend(self.inner.timers.iter().map(|entry| entry.key().clone()));
        ids.sort();
        ids.dedup();

        for id in &ids {
            if let Err(err) = self.disconnect(id).await {
                warn!(session = %id, error = %err, "failed to disconnect during shutdown");
            }
        }
        info!(sessions = ids.len(), "supervisor shut down");
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Current status; `Disconnected` when the session is not live
    pub fn get_status(&self, id: &SessionId) -> SessionStatus {
        self.inner
            .sessions
            .get(id)
            .map(|live| live.status)
            .unwrap_or(SessionStatus::Disconnected)
    }

    /// Pending pairing QR payload
    pub fn get_qr(&self, id: &SessionId) -> Option<String> {
        self.inner.sessions.get(id).and_then(|live| live.qr.clone())
    }

    /// Snapshot of all live sessions, ordered by id
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .inner
            .sessions
            .iter()
            .map(|entry| SessionSummary {
                id: entry.key().clone(),
                status: entry.status,
                has_qr: entry.qr.is_some(),
                last_connected: entry.last_connected,
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Whether a reconnect attempt is scheduled
    pub fn has_pending_reconnect(&self, id: &SessionId) -> bool {
        self.inner.timers.contains_key(id)
    }

    // ------------------------------------------------------------------------
    // Socket Commands
    // ------------------------------------------------------------------------

    /// Request a phone-number pairing code from the live socket
    pub async fn request_pairing_code(&self, id: &SessionId, phone_number: &str) -> HiveResult<String> {
        let socket = self.inner.live_socket(id, false)?;
        socket.request_pairing_code(phone_number).await
    }

    /// Send a text message; the session must be open
    pub async fn send_text(&self, id: &SessionId, jid: &str, text: &str) -> HiveResult<String> {
        let socket = self.inner.live_socket(id, true)?;
        socket.send_message(jid, OutgoingMessage::text(text)).await
    }

    /// Apply a chat modification; the session must be open
    pub async fn chat_modify(
        &self,
        id: &SessionId,
        jid: &str,
        modification: ChatModification,
    ) -> HiveResult<()> {
        let socket = self.inner.live_socket(id, true)?;
        socket.chat_modify(jid, modification).await
    }

    /// Revoke the device registration
    ///
    /// The engine answers with a logged-out close, which tears the session
    /// down without a reconnect.
    pub async fn logout(&self, id: &SessionId) -> HiveResult<()> {
        let socket = self.inner.live_socket(id, false)?;
        socket.logout().await
    }
}

// ----------------------------------------------------------------------------
// Internals
// ----------------------------------------------------------------------------

impl Inner {
    fn session_lock(&self, id: &SessionId) -> Arc<Mutex<()>> {
        self.locks.entry(id.clone()).or_default().clone()
    }

    /// Drop a session's lock once nothing else holds or waits on it
    fn prune_lock(&self, id: &SessionId) {
        if self.sessions.contains_key(id) || self.timers.contains_key(id) {
            return;
        }
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn auth_store(&self, id: &SessionId) -> Arc<AuthStateStore> {
        self.auth_stores
            .entry(id.clone())
            .or_insert_with(|| {
                Arc::new(AuthStateStore::new(
                    id.clone(),
                    self.storage.clone(),
                    self.fragment_keys.clone(),
                ))
            })
            .clone()
    }

    fn live_socket(&self, id: &SessionId, require_open: bool) -> HiveResult<Arc<dyn ProtocolSocket>> {
        match self.sessions.get(id) {
            Some(live) if !require_open || live.status == SessionStatus::Open => {
                Ok(live.socket.clone())
            }
            _ => Err(HiveError::not_connected(id.as_str())),
        }
    }

    /// Write a session record; failures are logged, never surfaced
    fn persist(&self, record: &SessionRecord) {
        if let Err(err) = self.storage.upsert_session(record) {
            error!(session = %record.id, error = %err, "failed to persist session record");
        }
    }

    /// Open and register a socket; caller holds the session lock
    async fn connect_locked(self: &Arc<Self>, id: &SessionId) -> HiveResult<()> {
        if self.sessions.contains_key(id) {
            debug!(session = %id, "session already live");
            return Ok(());
        }

        let auth = self.auth_store(id).load().await?;
        let connection = self.engine.open(id, auth).await?;
        let connection_id = Uuid::new_v4();

        let last_connected = match self.storage.get_session(id) {
            Ok(record) => record.and_then(|r| r.last_connected),
            Err(err) => {
                warn!(session = %id, error = %err, "failed to read session record");
                None
            }
        };

        let events = self.spawn_event_task(id.clone(), connection_id, connection.events);
        let live = LiveSession {
            connection_id,
            socket: connection.socket,
            status: SessionStatus::Connecting,
            qr: None,
            last_connected,
            events: Some(events),
        };
        self.persist(&live.record(id));
        self.sessions.insert(id.clone(), live);

        info!(session = %id, connection = %connection_id, "session connecting");
        Ok(())
    }

    /// Close the socket and drop the registry entry; caller holds the lock
    ///
    /// The returned entry still owns its event task. The registry entry is
    /// removed last.
    async fn teardown_locked(&self, id: &SessionId) -> Option<LiveSession> {
        let socket = self.sessions.get(id)?.socket.clone();
        if let Err(err) = socket.close().await {
            debug!(session = %id, error = %err, "socket close failed");
        }
        self.sessions.remove(id).map(|(_, live)| live)
    }

    /// Tear down and purge a session; caller holds the lock
    async fn delete_locked(&self, id: &SessionId) -> HiveResult<()> {
        self.cancel_timer(id);

        let live = self.teardown_locked(id).await;
        if live.is_none() && self.storage.get_session(id)?.is_none() {
            return Err(HiveError::session_not_found(id.as_str()));
        }
        if let Some(events) = live.and_then(|mut live| live.events.take()) {
            events.cancel().await;
        }

        self.history.cancel(id);
        self.auth_store(id).clear().await?;
        self.storage.purge_session(id)?;
        self.auth_stores.remove(id);
        Ok(())
    }

    fn cancel_timer(&self, id: &SessionId) {
        if let Some((_, timer)) = self.timers.remove(id) {
            timer.handle.abort();
            debug!(session = %id, "cancelled pending reconnect");
        }
    }

    /// Schedule exactly one reconnect attempt; caller holds the lock
    fn schedule_reconnect_locked(self: &Arc<Self>, id: &SessionId) {
        self.cancel_timer(id);

        let token = Uuid::new_v4();
        let delay = self.config.reconnect_delay();
        let inner = Arc::clone(self);
        let session = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_reconnect(&session, token).await;
        });

        self.timers.insert(id.clone(), ReconnectTimer { token, handle });
        info!(session = %id, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
    }

    async fn fire_reconnect(self: &Arc<Self>, id: &SessionId, token: Uuid) {
        let lock = self.session_lock(id);
        let _guard = lock.lock().await;

        let current = self.timers.get(id).map(|timer| timer.token);
        if current != Some(token) {
            debug!(session = %id, "reconnect superseded");
            return;
        }
        self.timers.remove(id);

        info!(session = %id, "reconnecting");
        if let Err(err) = self.connect_locked(id).await {
            warn!(session = %id, error = %err, "reconnect failed, retrying after delay");
            self.schedule_reconnect_locked(id);
        }
    }

    // ------------------------------------------------------------------------
    // Event Handling
    // ------------------------------------------------------------------------

    fn spawn_event_task(
        self: &Arc<Self>,
        id: SessionId,
        connection_id: Uuid,
        mut events: mpsc::Receiver<EngineEvent>,
    ) -> EventTask {
        let (stop, mut stopped) = oneshot::channel();
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let leftovers = loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break Leftovers::SaveCredentials,
                    event = events.recv() => match event {
                        Some(event) => {
                            if let ControlFlow::Break(leftovers) =
                                inner.handle_event(&id, connection_id, event).await
                            {
                                break leftovers;
                            }
                        }
                        None => break Leftovers::Discard,
                    },
                }
            };
            if leftovers == Leftovers::SaveCredentials {
                inner.save_queued_credentials(&id, &mut events).await;
            }
            debug!(session = %id, connection = %connection_id, "event task finished");
        });
        EventTask { stop, handle }
    }

    /// Persist credential updates still queued on a stopped socket's channel
    async fn save_queued_credentials(
        &self,
        id: &SessionId,
        events: &mut mpsc::Receiver<EngineEvent>,
    ) {
        let mut saved = 0usize;
        while let Ok(event) = events.try_recv() {
            let EngineEvent::CredsUpdate(update) = event else {
                continue;
            };
            match self.auth_store(id).save_creds(update).await {
                Ok(()) => saved += 1,
                Err(err) => error!(session = %id, error = %err, "failed to persist credentials"),
            }
        }
        if saved > 0 {
            debug!(session = %id, saved, "saved queued credential updates");
        }
    }

    async fn handle_event(
        self: &Arc<Self>,
        id: &SessionId,
        connection_id: Uuid,
        event: EngineEvent,
    ) -> ControlFlow<Leftovers> {
        debug!(session = %id, event = event.name(), "engine event");
        match event {
            EngineEvent::CredsUpdate(update) => {
                if let Err(err) = self.auth_store(id).save_creds(update).await {
                    error!(session = %id, error = %err, "failed to persist credentials");
                }
                ControlFlow::Continue(())
            }
            EngineEvent::ConnectionUpdate(update) => {
                self.handle_connection_update(id, connection_id, update).await
            }
            EngineEvent::MessagesUpsert { messages, kind } => {
                if self.config.store_live_messages {
                    match self.history.store_messages(id, &messages).await {
                        Ok(inserted) => {
                            debug!(session = %id, ?kind, inserted, "stored live messages")
                        }
                        Err(err) => {
                            error!(session = %id, error = %err, "failed to store live messages")
                        }
                    }
                }
                ControlFlow::Continue(())
            }
            EngineEvent::HistorySync(batch) => {
                self.history.ingest(id, batch).await;
                ControlFlow::Continue(())
            }
        }
    }

    async fn handle_connection_update(
        self: &Arc<Self>,
        id: &SessionId,
        connection_id: Uuid,
        update: ConnectionUpdate,
    ) -> ControlFlow<Leftovers> {
        let lock = self.session_lock(id);
        let _guard = lock.lock().await;

        let is_current = self
            .sessions
            .get(id)
            .map_or(false, |live| live.connection_id == connection_id);
        if !is_current {
            debug!(session = %id, connection = %connection_id, "ignoring stale connection update");
            return ControlFlow::Break(Leftovers::SaveCredentials);
        }

        if let Some(qr) = update.qr.clone() {
            let record = self.sessions.get_mut(id).map(|mut live| {
                live.qr = Some(qr);
                live.record(id)
            });
            if let Some(record) = record {
                self.persist(&record);
            }
            info!(session = %id, "pairing QR available");
        }

        match update.connection {
            Some(ConnectionPhase::Open) => {
                let record = self.sessions.get_mut(id).map(|mut live| {
                    live.status = SessionStatus::Open;
                    live.qr = None;
                    live.last_connected = Some(Utc::now());
                    live.record(id)
                });
                if let Some(record) = record {
                    self.persist(&record);
                }
                info!(session = %id, "session open");
                ControlFlow::Continue(())
            }
            Some(ConnectionPhase::Connecting) => {
                let record = self.sessions.get_mut(id).map(|mut live| {
                    live.status = SessionStatus::Connecting;
                    live.record(id)
                });
                if let Some(record) = record {
                    self.persist(&record);
                }
                ControlFlow::Continue(())
            }
            Some(ConnectionPhase::Close) => {
                ControlFlow::Break(self.handle_close_locked(id, &update).await)
            }
            None => ControlFlow::Continue(()),
        }
    }

    /// Tear down after the engine closed the socket; caller holds the lock
    ///
    /// Runs on the session's own event task, so the entry's task handle is
    /// dropped rather than awaited.
    async fn handle_close_locked(
        self: &Arc<Self>,
        id: &SessionId,
        update: &ConnectionUpdate,
    ) -> Leftovers {
        let reason = update.disconnect_reason();
        let Some(live) = self.teardown_locked(id).await else {
            return Leftovers::SaveCredentials;
        };
        self.persist(&SessionRecord {
            status: SessionStatus::Close,
            qr_code: None,
            ..live.record(id)
        });

        if reason.is_logged_out() {
            warn!(session = %id, "session logged out, not reconnecting");
            self.history.cancel(id);
            if self.config.purge_auth_on_logout {
                if let Err(err) = self.auth_store(id).clear().await {
                    error!(session = %id, error = %err, "failed to clear auth state after logout");
                }
                return Leftovers::Discard;
            }
            return Leftovers::SaveCredentials;
        }

        info!(session = %id, ?reason, "connection closed");
        self.schedule_reconnect_locked(id);
        Leftovers::SaveCredentials
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
