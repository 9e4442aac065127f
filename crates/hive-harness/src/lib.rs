//! Hive Harness
//!
//! A scripted [`ProtocolEngine`] for driving the session supervisor without a
//! network. Every `open` hands out a fresh [`ScriptedSocket`] and event
//! channel; tests push engine events into the latest connection of a session
//! and inspect what the supervisor did with the socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use hive_core::{
    AuthState, ChatModification, ConnectionUpdate, EngineConnection, EngineError, EngineEvent,
    HiveError, HiveResult, OutgoingMessage, ProtocolEngine, ProtocolSocket, SessionId,
};

/// Pairing code handed out by every scripted socket
pub const PAIRING_CODE: &str = "HIVE-2024";

/// Capacity of each scripted event channel
const EVENT_CAPACITY: usize = 64;

/// Status code the scripted engine uses for a logout close
const LOGGED_OUT: u16 = 401;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Scripted Socket
// ----------------------------------------------------------------------------

/// Socket that records every command it receives
pub struct ScriptedSocket {
    session_id: SessionId,
    events: mpsc::Sender<EngineEvent>,
    sent: Mutex<Vec<(String, OutgoingMessage)>>,
    modifications: Mutex<Vec<(String, ChatModification)>>,
    closed: AtomicBool,
    logged_out: AtomicBool,
    next_message: AtomicUsize,
}

impl ScriptedSocket {
    fn new(session_id: SessionId, events: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            session_id,
            events,
            sent: Mutex::new(Vec::new()),
            modifications: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            next_message: AtomicUsize::new(1),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Messages sent through this socket, in order
    pub fn sent(&self) -> Vec<(String, OutgoingMessage)> {
        locked(&self.sent).clone()
    }

    pub fn modifications(&self) -> Vec<(String, ChatModification)> {
        locked(&self.modifications).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> HiveResult<()> {
        if self.is_closed() {
            return Err(HiveError::Engine(EngineError::Closed));
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolSocket for ScriptedSocket {
    async fn send_message(&self, jid: &str, message: OutgoingMessage) -> HiveResult<String> {
        self.ensure_open()?;
        let n = self.next_message.fetch_add(1, Ordering::SeqCst);
        locked(&self.sent).push((jid.to_string(), message));
        Ok(format!("{}-MSG-{n}", self.session_id))
    }

    async fn chat_modify(&self, jid: &str, modification: ChatModification) -> HiveResult<()> {
        self.ensure_open()?;
        locked(&self.modifications).push((jid.to_string(), modification));
        Ok(())
    }

    async fn request_pairing_code(&self, _phone_number: &str) -> HiveResult<String> {
        self.ensure_open()?;
        Ok(PAIRING_CODE.to_string())
    }

    async fn logout(&self) -> HiveResult<()> {
        self.ensure_open()?;
        self.logged_out.store(true, Ordering::SeqCst);
        let close = EngineEvent::ConnectionUpdate(ConnectionUpdate::closed(LOGGED_OUT));
        self.events
            .send(close)
            .await
            .map_err(|_| HiveError::Engine(EngineError::Closed))
    }

    async fn close(&self) -> HiveResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Scripted Engine
// ----------------------------------------------------------------------------

struct ScriptedConnection {
    socket: Arc<ScriptedSocket>,
    events: mpsc::Sender<EngineEvent>,
    auth: AuthState,
}

#[derive(Default)]
struct EngineState {
    connections: Mutex<HashMap<SessionId, Vec<ScriptedConnection>>>,
    failures_remaining: AtomicUsize,
    open_delay: Mutex<Option<Duration>>,
}

/// Engine whose sockets are driven by the test
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    state: Arc<EngineState>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` opens fail
    pub fn fail_next_opens(&self, count: usize) {
        self.state.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Delay every open, widening race windows
    pub fn set_open_delay(&self, delay: Duration) {
        *locked(&self.state.open_delay) = Some(delay);
    }

    /// Successful opens for a session
    pub fn open_count(&self, session_id: &SessionId) -> usize {
        locked(&self.state.connections)
            .get(session_id)
            .map_or(0, Vec::len)
    }

    pub fn total_opens(&self) -> usize {
        locked(&self.state.connections).values().map(Vec::len).sum()
    }

    /// Latest socket opened for a session
    pub fn socket(&self, session_id: &SessionId) -> Option<Arc<ScriptedSocket>> {
        locked(&self.state.connections)
            .get(session_id)
            .and_then(|conns| conns.last())
            .map(|conn| conn.socket.clone())
    }

    /// Every socket opened for a session, oldest first
    pub fn sockets(&self, session_id: &SessionId) -> Vec<Arc<ScriptedSocket>> {
        locked(&self.state.connections)
            .get(session_id)
            .map(|conns| conns.iter().map(|c| c.socket.clone()).collect())
            .unwrap_or_default()
    }

    /// Auth state the latest socket was opened with
    pub fn auth(&self, session_id: &SessionId) -> Option<AuthState> {
        locked(&self.state.connections)
            .get(session_id)
            .and_then(|conns| conns.last())
            .map(|conn| conn.auth.clone())
    }

    /// Push an event into the latest connection of a session
    ///
    /// Returns false when no connection exists or its receiver is gone.
    pub async fn emit(&self, session_id: &SessionId, event: EngineEvent) -> bool {
        let sender = locked(&self.state.connections)
            .get(session_id)
            .and_then(|conns| conns.last())
            .map(|conn| conn.events.clone());
        self.send(sender, event).await
    }

    /// Push an event into a specific connection, by open order
    pub async fn emit_to(&self, session_id: &SessionId, index: usize, event: EngineEvent) -> bool {
        let sender = locked(&self.state.connections)
            .get(session_id)
            .and_then(|conns| conns.get(index))
            .map(|conn| conn.events.clone());
        self.send(sender, event).await
    }

    async fn send(&self, sender: Option<mpsc::Sender<EngineEvent>>, event: EngineEvent) -> bool {
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ProtocolEngine for ScriptedEngine {
    async fn open(&self, session_id: &SessionId, auth: AuthState) -> HiveResult<EngineConnection> {
        let delay = *locked(&self.state.open_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .state
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            debug!(session = %session_id, "scripted open failure");
            return Err(HiveError::open_failed(session_id.as_str(), "scripted failure"));
        }

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let socket = Arc::new(ScriptedSocket::new(session_id.clone(), tx.clone()));
        locked(&self.state.connections)
            .entry(session_id.clone())
            .or_default()
            .push(ScriptedConnection {
                socket: socket.clone(),
                events: tx,
                auth,
            });
        debug!(session = %session_id, "scripted socket opened");

        Ok(EngineConnection {
            socket,
            events: rx,
        })
    }
}
