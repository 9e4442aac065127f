//! Storage abstraction for Hive
//!
//! A generic upsert/transaction interface over the durable store. Backends
//! keep every write for one call atomic: a batch of contacts either lands
//! completely or not at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{StorageError, StorageResult};
use crate::message::NormalizedMessage;
use crate::types::{SessionId, SessionStatus};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

// ----------------------------------------------------------------------------
// Records
// ----------------------------------------------------------------------------

/// Durable projection of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: SessionId,
    pub status: SessionStatus,
    pub qr_code: Option<String>,
    pub last_connected: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            status: SessionStatus::Close,
            qr_code: None,
            last_connected: None,
        }
    }
}

/// One auth state row
///
/// The base row (`key_id = None`) holds `{creds, keys}`; fragment rows hold
/// one encoded credential field each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStateRecord {
    pub session_id: SessionId,
    pub key_id: Option<String>,
    pub data: Value,
}

impl AuthStateRecord {
    pub fn base(session_id: SessionId, data: Value) -> Self {
        Self {
            session_id,
            key_id: None,
            data,
        }
    }

    pub fn fragment(session_id: SessionId, key_id: impl Into<String>, data: Value) -> Self {
        Self {
            session_id,
            key_id: Some(key_id.into()),
            data,
        }
    }

    /// An empty fragment key would alias the base row
    pub fn check_key(&self) -> StorageResult<()> {
        match self.key_id.as_deref() {
            Some("") => Err(StorageError::Corrupt {
                reason: format!("empty auth fragment key for session {}", self.session_id),
            }),
            _ => Ok(()),
        }
    }
}

/// Persisted contact, unique per `(session_id, remote_id)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub session_id: SessionId,
    pub remote_id: String,
    pub name: Option<String>,
    pub notify: Option<String>,
    pub verified_name: Option<String>,
    pub img_url: Option<String>,
    pub status: Option<String>,
}

impl ContactRecord {
    /// Fill fields missing here from an older copy of the same contact
    pub fn merge_over(mut self, older: &ContactRecord) -> Self {
        self.name = self.name.or_else(|| older.name.clone());
        self.notify = self.notify.or_else(|| older.notify.clone());
        self.verified_name = self.verified_name.or_else(|| older.verified_name.clone());
        self.img_url = self.img_url.or_else(|| older.img_url.clone());
        self.status = self.status.or_else(|| older.status.clone());
        self
    }
}

/// Persisted chat, unique per `(session_id, remote_id)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub session_id: SessionId,
    pub remote_id: String,
    pub name: Option<String>,
    pub unread_count: Option<i64>,
    pub conversation_timestamp: Option<i64>,
    pub archived: Option<bool>,
    pub pinned: Option<i64>,
    pub mute_end_time: Option<i64>,
    pub read_only: Option<bool>,
}

impl ChatRecord {
    /// Fill fields missing here from an older copy of the same chat
    pub fn merge_over(mut self, older: &ChatRecord) -> Self {
        self.name = self.name.or_else(|| older.name.clone());
        self.unread_count = self.unread_count.or(older.unread_count);
        self.conversation_timestamp = self.conversation_timestamp.or(older.conversation_timestamp);
        self.archived = self.archived.or(older.archived);
        self.pinned = self.pinned.or(older.pinned);
        self.mute_end_time = self.mute_end_time.or(older.mute_end_time);
        self.read_only = self.read_only.or(older.read_only);
        self
    }
}

/// Persisted message, unique per `(session_id, message_id)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub session_id: SessionId,
    pub message_id: String,
    pub remote_id: String,
    pub from_me: bool,
    pub participant: Option<String>,
    pub push_name: Option<String>,
    /// Seconds since the epoch
    pub timestamp: Option<i64>,
    pub content: NormalizedMessage,
}

/// Row counts of one session's history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCounts {
    pub contacts: usize,
    pub chats: usize,
    pub messages: usize,
}

impl HistoryCounts {
    pub fn is_empty(&self) -> bool {
        self.contacts == 0 && self.chats == 0 && self.messages == 0
    }
}

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

/// Durable store consumed by the runtime
pub trait Storage: Send + Sync {
    // Sessions

    fn upsert_session(&self, record: &SessionRecord) -> StorageResult<()>;

    fn get_session(&self, id: &SessionId) -> StorageResult<Option<SessionRecord>>;

    fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>>;

    /// Delete the session row; returns whether it existed
    fn delete_session(&self, id: &SessionId) -> StorageResult<bool>;

    // Auth state

    /// Read the base row (`None`) or one fragment row
    fn get_auth_state(
        &self,
        session_id: &SessionId,
        key_id: Option<&str>,
    ) -> StorageResult<Option<AuthStateRecord>>;

    fn upsert_auth_state(&self, record: &AuthStateRecord) -> StorageResult<()>;

    /// All fragment rows of a session
    fn list_auth_fragments(&self, session_id: &SessionId) -> StorageResult<Vec<AuthStateRecord>>;

    /// Delete every auth row of a session; returns the number removed
    fn delete_auth_state(&self, session_id: &SessionId) -> StorageResult<usize>;

    // History

    /// Upsert a batch in one transaction; absent fields keep stored values
    fn upsert_contacts(&self, contacts: &[ContactRecord]) -> StorageResult<usize>;

    /// Upsert a batch in one transaction; absent fields keep stored values
    fn upsert_chats(&self, chats: &[ChatRecord]) -> StorageResult<usize>;

    /// Insert a batch in one transaction, skipping rows already present;
    /// returns the number actually inserted
    fn insert_messages(&self, messages: &[MessageRecord]) -> StorageResult<usize>;

    fn list_contacts(&self, session_id: &SessionId) -> StorageResult<Vec<ContactRecord>>;

    fn list_chats(&self, session_id: &SessionId) -> StorageResult<Vec<ChatRecord>>;

    /// Newest first, optionally restricted to one chat
    fn list_messages(
        &self,
        session_id: &SessionId,
        remote_id: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<MessageRecord>>;

    fn history_counts(&self, session_id: &SessionId) -> StorageResult<HistoryCounts>;

    /// Remove everything stored for a session
    fn purge_session(&self, session_id: &SessionId) -> StorageResult<()>;

    /// Check if storage is available and accessible
    fn is_available(&self) -> bool;
}

/// Order messages newest first, ties broken by id
pub(crate) fn sort_newest_first(messages: &mut [MessageRecord]) {
    messages.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
}
