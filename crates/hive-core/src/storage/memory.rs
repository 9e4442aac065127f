//! In-memory storage backend for testing and ephemeral deployments

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{
    sort_newest_first, AuthStateRecord, ChatRecord, ContactRecord, HistoryCounts, MessageRecord,
    SessionRecord, Storage,
};
use crate::errors::{StorageError, StorageResult};
use crate::types::SessionId;

/// `(session, key)` composite key
type RowKey = (SessionId, String);

#[derive(Debug, Default)]
struct Tables {
    sessions: BTreeMap<SessionId, SessionRecord>,
    /// Base rows are keyed by the empty string
    auth: BTreeMap<RowKey, AuthStateRecord>,
    contacts: BTreeMap<RowKey, ContactRecord>,
    chats: BTreeMap<RowKey, ChatRecord>,
    messages: BTreeMap<RowKey, MessageRecord>,
}

/// In-memory storage implementation
///
/// All tables sit behind one mutex, so every call is atomic.
#[derive(Debug)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability; an unavailable store fails every call
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn tables(&self) -> StorageResult<MutexGuard<'_, Tables>> {
        if !self.is_available() {
            return Err(StorageError::NotAvailable {
                reason: "memory storage disabled".to_string(),
            });
        }
        self.tables.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn auth_key(session_id: &SessionId, key_id: Option<&str>) -> RowKey {
    (session_id.clone(), key_id.unwrap_or_default().to_string())
}

fn in_session<'a, V>(
    table: &'a BTreeMap<RowKey, V>,
    session_id: &'a SessionId,
) -> impl Iterator<Item = &'a V> + 'a {
    table
        .iter()
        .filter(move |((session, _), _)| session == session_id)
        .map(|(_, value)| value)
}

impl Storage for MemoryStorage {
    fn upsert_session(&self, record: &SessionRecord) -> StorageResult<()> {
        self.tables()?
            .sessions
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get_session(&self, id: &SessionId) -> StorageResult<Option<SessionRecord>> {
        Ok(self.tables()?.sessions.get(id).cloned())
    }

    fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>> {
        Ok(self.tables()?.sessions.values().cloned().collect())
    }

    fn delete_session(&self, id: &SessionId) -> StorageResult<bool> {
        Ok(self.tables()?.sessions.remove(id).is_some())
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
            .tables()?
            .auth
            .get(&auth_key(session_id, key_id))
            .cloned())
    }

    fn upsert_auth_state(&self, record: &AuthStateRecord) -> StorageResult<()> {
        record.check_key()?;
        let key = auth_key(&record.session_id, record.key_id.as_deref());
        self.tables()?.auth.insert(key, record.clone());
        Ok(())
    }

    fn list_auth_fragments(&self, session_id: &SessionId) -> StorageResult<Vec<AuthStateRecord>> {
        let tables = self.tables()?;
        Ok(in_session(&tables.auth, session_id)
            .filter(|record| record.key_id.is_some())
            .cloned()
            .collect())
    }

    fn delete_auth_state(&self, session_id: &SessionId) -> StorageResult<usize> {
        let mut tables = self.tables()?;
        let before = tables.auth.len();
        tables.auth.retain(|(session, _), _| session != session_id);
        Ok(before - tables.auth.len())
    }

    fn upsert_contacts(&self, contacts: &[ContactRecord]) -> StorageResult<usize> {
        let mut tables = self.tables()?;
        for contact in contacts {
            let key = (contact.session_id.clone(), contact.remote_id.clone());
            let merged = match tables.contacts.get(&key) {
                Some(existing) => contact.clone().merge_over(existing),
                None => contact.clone(),
            };
            tables.contacts.insert(key, merged);
        }
        Ok(contacts.len())
    }

    fn upsert_chats(&self, chats: &[ChatRecord]) -> StorageResult<usize> {
        let mut tables = self.tables()?;
        for chat in chats {
            let key = (chat.session_id.clone(), chat.remote_id.clone());
            let merged = match tables.chats.get(&key) {
                Some(existing) => chat.clone().merge_over(existing),
                None => chat.clone(),
            };
            tables.chats.insert(key, merged);
        }
        Ok(chats.len())
    }

    fn insert_messages(&self, messages: &[MessageRecord]) -> StorageResult<usize> {
        let mut tables = self.tables()?;
        let mut inserted = 0;
        for message in messages {
            let key = (message.session_id.clone(), message.message_id.clone());
            if !tables.messages.contains_key(&key) {
                tables.messages.insert(key, message.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn list_contacts(&self, session_id: &SessionId) -> StorageResult<Vec<ContactRecord>> {
        let tables = self.tables()?;
        Ok(in_session(&tables.contacts, session_id).cloned().collect())
    }

    fn list_chats(&self, session_id: &SessionId) -> StorageResult<Vec<ChatRecord>> {
        let tables = self.tables()?;
        Ok(in_session(&tables.chats, session_id).cloned().collect())
    }

    fn list_messages(
        &self,
        session_id: &SessionId,
        remote_id: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<MessageRecord>> {
        let tables = self.tables()?;
        let mut messages: Vec<MessageRecord> = in_session(&tables.messages, session_id)
            .filter(|message| remote_id.map_or(true, |remote| message.remote_id == remote))
            .cloned()
            .collect();
        sort_newest_first(&mut messages);
        messages.truncate(limit);
        Ok(messages)
    }

    fn history_counts(&self, session_id: &SessionId) -> StorageResult<HistoryCounts> {
        let tables = self.tables()?;
        Ok(HistoryCounts {
            contacts: in_session(&tables.contacts, session_id).count(),
            chats: in_session(&tables.chats, session_id).count(),
            messages: in_session(&tables.messages, session_id).count(),
        })
    }

    fn purge_session(&self, session_id: &SessionId) -> StorageResult<()> {
        let mut tables = self.tables()?;
        tables.sessions.remove(session_id);
        tables.auth.retain(|(session, _), _| session != session_id);
        tables.contacts.retain(|(session, _), _| session != session_id);
        tables.chats.retain(|(session, _), _| session != session_id);
        tables.messages.retain(|(session, _), _| session != session_id);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::normalize;
    use serde_json::json;

    fn sid(name: &str) -> SessionId {
        SessionId::new(name).unwrap()
    }

    fn message(session: &str, id: &str, remote: &str, ts: i64) -> MessageRecord {
        MessageRecord {
            session_id: sid(session),
            message_id: id.to_string(),
            remote_id: remote.to_string(),
            from_me: false,
            participant: None,
            push_name: None,
            timestamp: Some(ts),
            content: normalize(&json!({"conversation": id})),
        }
    }

    #[test]
    fn test_auth_base_and_fragments_are_separate_rows() {
        let storage = MemoryStorage::new();
        let alpha = sid("alpha");
        storage
            .upsert_auth_state(&AuthStateRecord::base(alpha.clone(), json!({"creds": {}})))
            .unwrap();
        storage
            .upsert_auth_state(&AuthStateRecord::fragment(alpha.clone(), "noiseKey", json!(1)))
            .unwrap();

        assert!(storage.get_auth_state(&alpha, None).unwrap().is_some());
        assert_eq!(
            storage.get_auth_state(&alpha, Some("noiseKey")).unwrap().unwrap().data,
            json!(1)
        );
        assert_eq!(storage.list_auth_fragments(&alpha).unwrap().len(), 1);
        assert_eq!(storage.delete_auth_state(&alpha).unwrap(), 2);
    }

    #[test]
    fn test_empty_fragment_key_never_reaches_base_row() {
        let storage = MemoryStorage::new();
        let alpha = sid("alpha");
        storage
            .upsert_auth_state(&AuthStateRecord::base(alpha.clone(), json!({"creds": {"me": "x"}})))
            .unwrap();

        assert!(storage.get_auth_state(&alpha, Some("")).unwrap().is_none());
        assert!(matches!(
            storage.upsert_auth_state(&AuthStateRecord::fragment(alpha.clone(), "", json!(1))),
            Err(StorageError::Corrupt { .. })
        ));
        assert_eq!(
            storage.get_auth_state(&alpha, None).unwrap().unwrap().data,
            json!({"creds": {"me": "x"}})
        );
    }

    #[test]
    fn test_insert_messages_skips_duplicates() {
        let storage = MemoryStorage::new();
        let batch = vec![message("a", "m1", "r", 1), message("a", "m2", "r", 2)];
        assert_eq!(storage.insert_messages(&batch).unwrap(), 2);
        assert_eq!(storage.insert_messages(&batch).unwrap(), 0);
        assert_eq!(storage.history_counts(&sid("a")).unwrap().messages, 2);
    }

    #[test]
    fn test_list_messages_newest_first_with_filter() {
        let storage = MemoryStorage::new();
        storage
            .insert_messages(&[
                message("a", "m1", "r1", 10),
                message("a", "m2", "r2", 30),
                message("a", "m3", "r1", 20),
                message("b", "m4", "r1", 40),
            ])
            .unwrap();

        let all = storage.list_messages(&sid("a"), None, 10).unwrap();
        let ids: Vec<_> = all.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m1"]);

        let r1 = storage.list_messages(&sid("a"), Some("r1"), 1).unwrap();
        assert_eq!(r1.len(), 1);
        assert_eq!(r1[0].message_id, "m3");
    }

    #[test]
    fn test_contact_upsert_keeps_known_fields() {
        let storage = MemoryStorage::new();
        let contact = ContactRecord {
            session_id: sid("a"),
            remote_id: "1@s.whatsapp.net".into(),
            name: Some("Ana".into()),
            notify: None,
            verified_name: None,
            img_url: None,
            status: None,
        };
        storage.upsert_contacts(&[contact.clone()]).unwrap();
        storage
            .upsert_contacts(&[ContactRecord {
                name: None,
                notify: Some("ana".into()),
                ..contact
            }])
            .unwrap();

        let stored = storage.list_contacts(&sid("a")).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name.as_deref(), Some("Ana"));
        assert_eq!(stored[0].notify.as_deref(), Some("ana"));
    }

    #[test]
    fn test_purge_leaves_other_sessions() {
        let storage = MemoryStorage::new();
        storage.upsert_session(&SessionRecord::new(sid("a"))).unwrap();
        storage.upsert_session(&SessionRecord::new(sid("b"))).unwrap();
        storage
            .insert_messages(&[message("a", "m1", "r", 1), message("b", "m2", "r", 1)])
            .unwrap();

        storage.purge_session(&sid("a")).unwrap();
        assert!(storage.get_session(&sid("a")).unwrap().is_none());
        assert!(storage.history_counts(&sid("a")).unwrap().is_empty());
        assert_eq!(storage.history_counts(&sid("b")).unwrap().messages, 1);
    }

    #[test]
    fn test_unavailable_storage_fails() {
        let storage = MemoryStorage::new();
        storage.set_available(false);
        assert!(!storage.is_available());
        assert!(matches!(
            storage.list_sessions(),
            Err(StorageError::NotAvailable { .. })
        ));
    }
}
