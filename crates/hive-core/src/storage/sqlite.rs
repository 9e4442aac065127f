//! SQLite storage backend
//!
//! One connection behind a mutex; batch writes run inside a transaction so a
//! failed chunk leaves no partial rows behind. Auth base rows store the empty
//! string as `key_id` so that the composite primary key stays total.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{
    AuthStateRecord, ChatRecord, ContactRecord, HistoryCounts, MessageRecord, SessionRecord,
    Storage,
};
use crate::errors::{StorageError, StorageResult};
use crate::message::NormalizedMessage;
use crate::types::{SessionId, SessionStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    qr_code TEXT,
    last_connected TEXT
);

CREATE TABLE IF NOT EXISTS auth_state (
    session_id TEXT NOT NULL,
    key_id TEXT NOT NULL DEFAULT '',
    data TEXT NOT NULL,
    PRIMARY KEY (session_id, key_id)
);

CREATE TABLE IF NOT EXISTS contacts (
    session_id TEXT NOT NULL,
    remote_id TEXT NOT NULL,
    name TEXT,
    notify TEXT,
    verified_name TEXT,
    img_url TEXT,
    status TEXT,
    PRIMARY KEY (session_id, remote_id)
);

CREATE TABLE IF NOT EXISTS chats (
    session_id TEXT NOT NULL,
    remote_id TEXT NOT NULL,
    name TEXT,
    unread_count INTEGER,
    conversation_timestamp INTEGER,
    archived INTEGER,
    pinned INTEGER,
    mute_end_time INTEGER,
    read_only INTEGER,
    PRIMARY KEY (session_id, remote_id)
);

CREATE TABLE IF NOT EXISTS messages (
    session_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    remote_id TEXT NOT NULL,
    from_me INTEGER NOT NULL,
    participant TEXT,
    push_name TEXT,
    timestamp INTEGER,
    message_type TEXT NOT NULL,
    content TEXT NOT NULL,
    PRIMARY KEY (session_id, message_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat
    ON messages(session_id, remote_id, timestamp);
"#;

/// SQLite-backed [`Storage`]
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (and create if needed) a database file
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening sqlite storage");
        Self::with_connection(Connection::open(path)?)
    }

    /// Fresh in-memory database
    pub fn in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

// ----------------------------------------------------------------------------
// Row Mapping
// ----------------------------------------------------------------------------

fn conversion<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn session_id_at(row: &Row<'_>, index: usize) -> rusqlite::Result<SessionId> {
    let raw: String = row.get(index)?;
    SessionId::new(raw).map_err(|err| conversion(index, err))
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row<'_>, index: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw).map_err(|err| conversion(index, err))
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let status: String = row.get(1)?;
    let last_connected: Option<String> = row.get(3)?;
    Ok(SessionRecord {
        id: session_id_at(row, 0)?,
        status: status
            .parse::<SessionStatus>()
            .map_err(|err| conversion(1, err))?,
        qr_code: row.get(2)?,
        last_connected: last_connected
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|err| conversion(3, err))
            })
            .transpose()?,
    })
}

fn auth_from_row(row: &Row<'_>) -> rusqlite::Result<AuthStateRecord> {
    let key_id: String = row.get(1)?;
    Ok(AuthStateRecord {
        session_id: session_id_at(row, 0)?,
        key_id: Some(key_id).filter(|key| !key.is_empty()),
        data: json_at(row, 2)?,
    })
}

fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<ContactRecord> {
    Ok(ContactRecord {
        session_id: session_id_at(row, 0)?,
        remote_id: row.get(1)?,
        name: row.get(2)?,
        notify: row.get(3)?,
        verified_name: row.get(4)?,
        img_url: row.get(5)?,
        status: row.get(6)?,
    })
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRecord> {
    Ok(ChatRecord {
        session_id: session_id_at(row, 0)?,
        remote_id: row.get(1)?,
        name: row.get(2)?,
        unread_count: row.get(3)?,
        conversation_timestamp: row.get(4)?,
        archived: row.get(5)?,
        pinned: row.get(6)?,
        mute_end_time: row.get(7)?,
        read_only: row.get(8)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let content: NormalizedMessage = json_at(row, 7)?;
    Ok(MessageRecord {
        session_id: session_id_at(row, 0)?,
        message_id: row.get(1)?,
        remote_id: row.get(2)?,
        from_me: row.get(3)?,
        participant: row.get(4)?,
        push_name: row.get(5)?,
        timestamp: row.get(6)?,
        content,
    })
}

const CONTACT_COLUMNS: &str =
    "session_id, remote_id, name, notify, verified_name, img_url, status";
const CHAT_COLUMNS: &str = "session_id, remote_id, name, unread_count, conversation_timestamp, \
     archived, pinned, mute_end_time, read_only";
const MESSAGE_COLUMNS: &str =
    "session_id, message_id, remote_id, from_me, participant, push_name, timestamp, content";

// ----------------------------------------------------------------------------
// Storage Implementation
// ----------------------------------------------------------------------------

impl Storage for SqliteStorage {
    fn upsert_session(&self, record: &SessionRecord) -> StorageResult<()> {
        self.conn()?.execute(
            "INSERT INTO sessions (id, status, qr_code, last_connected)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                qr_code = excluded.qr_code,
                last_connected = excluded.last_connected",
            params![
                record.id.as_str(),
                record.status.as_str(),
                record.qr_code,
                record.last_connected.map(|at| at.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn get_session(&self, id: &SessionId) -> StorageResult<Option<SessionRecord>> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT id, status, qr_code, last_connected FROM sessions WHERE id = ?1",
                params![id.as_str()],
                session_from_row,
            )
            .optional()?)
    }

    fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, status, qr_code, last_connected FROM sessions ORDER BY id")?;
        let rows = stmt.query_map([], session_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn delete_session(&self, id: &SessionId) -> StorageResult<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM sessions WHERE id = ?1", params![id.as_str()])?;
        Ok(removed > 0)
    }

    fn get_auth_state(
        &self,
        session_id: &SessionId,
        key_id: Option<&str>,
    ) -> StorageResult<Option<AuthStateRecord>> {
        if key_id == Some("") {
            return Ok(None);
        }
        Ok(self
            .conn()?
            .query_row(
                "SELECT session_id, key_id, data FROM auth_state
                 WHERE session_id = ?1 AND key_id = ?2",
                params![session_id.as_str(), key_id.unwrap_or_default()],
                auth_from_row,
            )
            .optional()?)
    }

    fn upsert_auth_state(&self, record: &AuthStateRecord) -> StorageResult<()> {
        record.check_key()?;
        let data = serde_json::to_string(&record.data)?;
        self.conn()?.execute(
            "INSERT INTO auth_state (session_id, key_id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id, key_id) DO UPDATE SET data = excluded.data",
            params![
                record.session_id.as_str(),
                record.key_id.as_deref().unwrap_or_default(),
                data
            ],
        )?;
        Ok(())
    }

    fn list_auth_fragments(&self, session_id: &SessionId) -> StorageResult<Vec<AuthStateRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, key_id, data FROM auth_state
             WHERE session_id = ?1 AND key_id <> '' ORDER BY key_id",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], auth_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn delete_auth_state(&self, session_id: &SessionId) -> StorageResult<usize> {
        Ok(self.conn()?.execute(
            "DELETE FROM auth_state WHERE session_id = ?1",
            params![session_id.as_str()],
        )?)
    }

    fn upsert_contacts(&self, contacts: &[ContactRecord]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO contacts (session_id, remote_id, name, notify, verified_name, img_url, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(session_id, remote_id) DO UPDATE SET
                    name = COALESCE(excluded.name, contacts.name),
                    notify = COALESCE(excluded.notify, contacts.notify),
                    verified_name = COALESCE(excluded.verified_name, contacts.verified_name),
                    img_url = COALESCE(excluded.img_url, contacts.img_url),
                    status = COALESCE(excluded.status, contacts.status)",
            )?;
            for contact in contacts {
                stmt.execute(params![
                    contact.session_id.as_str(),
                    contact.remote_id,
                    contact.name,
                    contact.notify,
                    contact.verified_name,
                    contact.img_url,
                    contact.status,
                ])?;
            }
        }
        tx.commit()?;
        Ok(contacts.len())
    }

    fn upsert_chats(&self, chats: &[ChatRecord]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chats (session_id, remote_id, name, unread_count, conversation_timestamp,
                                    archived, pinned, mute_end_time, read_only)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(session_id, remote_id) DO UPDATE SET
                    name = COALESCE(excluded.name, chats.name),
                    unread_count = COALESCE(excluded.unread_count, chats.unread_count),
                    conversation_timestamp = COALESCE(excluded.conversation_timestamp, chats.conversation_timestamp),
                    archived = COALESCE(excluded.archived, chats.archived),
                    pinned = COALESCE(excluded.pinned, chats.pinned),
                    mute_end_time = COALESCE(excluded.mute_end_time, chats.mute_end_time),
                    read_only = COALESCE(excluded.read_only, chats.read_only)",
            )?;
            for chat in chats {
                stmt.execute(params![
                    chat.session_id.as_str(),
                    chat.remote_id,
                    chat.name,
                    chat.unread_count,
                    chat.conversation_timestamp,
                    chat.archived,
                    chat.pinned,
                    chat.mute_end_time,
                    chat.read_only,
                ])?;
            }
        }
        tx.commit()?;
        Ok(chats.len())
    }

    fn insert_messages(&self, messages: &[MessageRecord]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO messages (session_id, message_id, remote_id, from_me,
                                                 participant, push_name, timestamp, message_type, content)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for message in messages {
                let content = serde_json::to_string(&message.content)?;
                inserted += stmt.execute(params![
                    message.session_id.as_str(),
                    message.message_id,
                    message.remote_id,
                    message.from_me,
                    message.participant,
                    message.push_name,
                    message.timestamp,
                    message.content.message_type.as_str(),
                    content,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn list_contacts(&self, session_id: &SessionId) -> StorageResult<Vec<ContactRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE session_id = ?1 ORDER BY remote_id"
        ))?;
        let rows = stmt.query_map(params![session_id.as_str()], contact_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_chats(&self, session_id: &SessionId) -> StorageResult<Vec<ChatRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE session_id = ?1 ORDER BY remote_id"
        ))?;
        let rows = stmt.query_map(params![session_id.as_str()], chat_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_messages(
        &self,
        session_id: &SessionId,
        remote_id: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<MessageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE session_id = ?1 AND (?2 IS NULL OR remote_id = ?2)
             ORDER BY timestamp DESC, message_id ASC
             LIMIT ?3"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(
            params![session_id.as_str(), remote_id, limit],
            message_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn history_counts(&self, session_id: &SessionId) -> StorageResult<HistoryCounts> {
        let conn = self.conn()?;
        let count = |table: &str| -> StorageResult<usize> {
            let n: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE session_id = ?1"),
                params![session_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or_default())
        };
        Ok(HistoryCounts {
            contacts: count("contacts")?,
            chats: count("chats")?,
            messages: count("messages")?,
        })
    }

    fn purge_session(&self, session_id: &SessionId) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for table in ["messages", "chats", "contacts", "auth_state"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE session_id = ?1"),
                params![session_id.as_str()],
            )?;
        }
        tx.execute(
            "DELETE FROM sessions WHERE id = ?1",
            params![session_id.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.conn.lock().is_ok()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
