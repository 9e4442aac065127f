//! Protocol Engine Boundary
//!
//! The messaging protocol itself (handshake, encryption, framing) is an
//! external collaborator. This module defines what Hive consumes from it: a
//! factory that opens one socket per session, the socket's command surface and
//! the closed set of events it emits over a channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::auth::{AuthCredentials, AuthState};
use crate::errors::HiveResult;
use crate::types::{SessionId, SessionStatus};
use crate::wire::{HistoryBatch, UpsertKind, WireMessage};

// ----------------------------------------------------------------------------
// Connection Lifecycle
// ----------------------------------------------------------------------------

/// Connection phase reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

impl From<ConnectionPhase> for SessionStatus {
    fn from(phase: ConnectionPhase) -> Self {
        match phase {
            ConnectionPhase::Connecting => SessionStatus::Connecting,
            ConnectionPhase::Open => SessionStatus::Open,
            ConnectionPhase::Close => SessionStatus::Close,
        }
    }
}

/// Why the engine dropped a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Credentials were revoked; the session must be re-paired
    LoggedOut,
    /// Server asked for a fresh connection after pairing
    RestartRequired,
    ConnectionClosed,
    ConnectionLost,
    /// Another client took over this session
    ConnectionReplaced,
    BadSession,
    MultideviceMismatch,
    Forbidden,
    Unavailable,
    Other(u16),
    Unknown,
}

impl DisconnectReason {
    /// Map an engine status code
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => DisconnectReason::LoggedOut,
            Some(515) => DisconnectReason::RestartRequired,
            Some(428) => DisconnectReason::ConnectionClosed,
            Some(408) => DisconnectReason::ConnectionLost,
            Some(440) => DisconnectReason::ConnectionReplaced,
            Some(500) => DisconnectReason::BadSession,
            Some(411) => DisconnectReason::MultideviceMismatch,
            Some(403) => DisconnectReason::Forbidden,
            Some(503) => DisconnectReason::Unavailable,
            Some(other) => DisconnectReason::Other(other),
            None => DisconnectReason::Unknown,
        }
    }

    pub fn is_logged_out(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }
}

/// Details of the last disconnect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DisconnectInfo {
    pub status_code: Option<u16>,
    pub message: Option<String>,
}

impl DisconnectInfo {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            message: None,
        }
    }

    pub fn reason(&self) -> DisconnectReason {
        DisconnectReason::from_status_code(self.status_code)
    }
}

/// Partial connection state change; absent fields are unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionUpdate {
    /// Pairing QR payload awaiting a scan
    pub qr: Option<String>,
    pub connection: Option<ConnectionPhase>,
    pub last_disconnect: Option<DisconnectInfo>,
    pub is_new_login: Option<bool>,
}

impl ConnectionUpdate {
    pub fn qr(payload: impl Into<String>) -> Self {
        Self {
            qr: Some(payload.into()),
            ..Self::default()
        }
    }

    pub fn open() -> Self {
        Self {
            connection: Some(ConnectionPhase::Open),
            ..Self::default()
        }
    }

    pub fn closed(status_code: u16) -> Self {
        Self {
            connection: Some(ConnectionPhase::Close),
            last_disconnect: Some(DisconnectInfo::new(status_code)),
            ..Self::default()
        }
    }

    /// Reason of a close update; `Unknown` when none was given
    pub fn disconnect_reason(&self) -> DisconnectReason {
        self.last_disconnect
            .as_ref()
            .map(DisconnectInfo::reason)
            .unwrap_or(DisconnectReason::Unknown)
    }
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Events emitted by one engine socket
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ConnectionUpdate(ConnectionUpdate),
    /// Partial credential update to persist immediately
    CredsUpdate(AuthCredentials),
    MessagesUpsert {
        messages: Vec<WireMessage>,
        kind: UpsertKind,
    },
    HistorySync(HistoryBatch),
}

impl EngineEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::ConnectionUpdate(_) => "connection.update",
            EngineEvent::CredsUpdate(_) => "creds.update",
            EngineEvent::MessagesUpsert { .. } => "messages.upsert",
            EngineEvent::HistorySync(_) => "messaging-history.set",
        }
    }
}

// ----------------------------------------------------------------------------
// Socket Commands
// ----------------------------------------------------------------------------

/// Outgoing message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Text { text: String },
    /// Engine-native content passed through untouched
    Raw { content: Value },
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        OutgoingMessage::Text { text: text.into() }
    }
}

/// Chat-level modification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatModification {
    Archive { archived: bool },
    Pin { pinned: bool },
    /// Mute until the given epoch milliseconds; `None` unmutes
    Mute { until: Option<i64> },
    MarkRead { read: bool },
    Delete,
}

/// Live socket of one session
#[async_trait]
pub trait ProtocolSocket: Send + Sync {
    /// Send a message, returning the engine-assigned message id
    async fn send_message(&self, jid: &str, message: OutgoingMessage) -> HiveResult<String>;

    async fn chat_modify(&self, jid: &str, modification: ChatModification) -> HiveResult<()>;

    /// Request a phone-number pairing code instead of a QR scan
    async fn request_pairing_code(&self, phone_number: &str) -> HiveResult<String>;

    /// Revoke this device's registration
    async fn logout(&self) -> HiveResult<()>;

    /// Close the transport; must be idempotent
    async fn close(&self) -> HiveResult<()>;
}

/// Opened socket and its event stream
pub struct EngineConnection {
    pub socket: Arc<dyn ProtocolSocket>,
    pub events: mpsc::Receiver<EngineEvent>,
}

/// Factory of protocol sockets
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Open a socket bound to the session's auth state
    async fn open(&self, session_id: &SessionId, auth: AuthState) -> HiveResult<EngineConnection>;
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_disconnect_reason_mapping() {
        assert!(DisconnectReason::from_status_code(Some(401)).is_logged_out());
        assert_eq!(
            DisconnectReason::from_status_code(Some(515)),
            DisconnectReason::RestartRequired
        );
        assert_eq!(
            DisconnectReason::from_status_code(Some(599)),
            DisconnectReason::Other(599)
        );
        assert_eq!(DisconnectReason::from_status_code(None), DisconnectReason::Unknown);
    }

    #[test]
    fn test_connection_update_wire_shape() {
        let update: ConnectionUpdate = serde_json::from_value(json!({
            "connection": "close",
            "lastDisconnect": {"statusCode": 401, "message": "logged out"}
        }))
        .unwrap();
        assert_eq!(update.connection, Some(ConnectionPhase::Close));
        assert!(update.disconnect_reason().is_logged_out());
        assert_eq!(update.qr, None);
    }

    #[test]
    fn test_close_without_details_is_unknown() {
        let update = ConnectionUpdate {
            connection: Some(ConnectionPhase::Close),
            ..ConnectionUpdate::default()
        };
        assert_eq!(update.disconnect_reason(), DisconnectReason::Unknown);
        assert!(!update.disconnect_reason().is_logged_out());
    }

    #[test]
    fn test_outgoing_message_tagging() {
        assert_eq!(
            serde_json::to_value(OutgoingMessage::text("hello")).unwrap(),
            json!({"kind": "text", "text": "hello"})
        );
    }
}
