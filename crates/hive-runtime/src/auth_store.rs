//! Persistent Authentication State Store
//!
//! Durable, per-session credential storage built on the credential codec.
//!
//! Layout per session:
//! - one base row holding `{"creds": {...}, "keys": {...}}`, where `keys` is
//!   the flat signal keyspace (`"<category>-<id>" -> value`)
//! - one fragment row per configured credential field, keyed by field name
//!
//! On load the base credentials are unioned with every fragment; when a field
//! exists in both places the fragment wins.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use hive_core::codec::{decode, decode_map, encode};
use hive_core::{
    signal_key, AuthCredentials, AuthState, AuthStateRecord, AuthValue, HiveError, HiveResult,
    SessionId, SignalKeyDelta, SignalKeyStore, Storage,
};

const CREDS_FIELD: &str = "creds";
const KEYS_FIELD: &str = "keys";

/// Decoded view of the base row, kept in storage form
#[derive(Debug, Default)]
struct BaseRow {
    creds: Map<String, Value>,
    keys: Map<String, Value>,
}

impl BaseRow {
    fn from_data(data: Value) -> HiveResult<Self> {
        let Value::Object(mut root) = data else {
            return Err(HiveError::storage("auth base row is not an object"));
        };
        Ok(Self {
            creds: take_object(&mut root, CREDS_FIELD),
            keys: take_object(&mut root, KEYS_FIELD),
        })
    }

    fn into_data(self) -> Value {
        let mut root = Map::with_capacity(2);
        root.insert(CREDS_FIELD.to_string(), Value::Object(self.creds));
        root.insert(KEYS_FIELD.to_string(), Value::Object(self.keys));
        Value::Object(root)
    }
}

fn take_object(root: &mut Map<String, Value>, field: &str) -> Map<String, Value> {
    match root.remove(field) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

// ----------------------------------------------------------------------------
// Auth State Store
// ----------------------------------------------------------------------------

/// Credential and signal key store of one session
pub struct AuthStateStore {
    session_id: SessionId,
    storage: Arc<dyn Storage>,
    fragment_keys: Vec<String>,
    /// Serializes read-modify-write cycles on this session's rows
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for AuthStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStateStore")
            .field("session_id", &self.session_id)
            .field("fragment_keys", &self.fragment_keys)
            .finish_non_exhaustive()
    }
}

impl AuthStateStore {
    /// Create a store for one session
    pub fn new(session_id: SessionId, storage: Arc<dyn Storage>, fragment_keys: Vec<String>) -> Self {
        Self {
            session_id,
            storage,
            fragment_keys,
            write_lock: Mutex::new(()),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Load the reconciled auth state; empty on first run
    pub async fn load(self: &Arc<Self>) -> HiveResult<AuthState> {
        let creds = self.load_creds().await?;
        Ok(AuthState {
            creds,
            keys: self.clone(),
        })
    }

    /// Reconciled credentials: base fields unioned with every fragment
    pub async fn load_creds(&self) -> HiveResult<AuthCredentials> {
        let _guard = self.write_lock.lock().await;

        let mut creds = match self.storage.get_auth_state(&self.session_id, None)? {
            Some(record) => decode_map(&Value::Object(BaseRow::from_data(record.data)?.creds)),
            None => AuthCredentials::new(),
        };

        for fragment in self.storage.list_auth_fragments(&self.session_id)? {
            if let Some(field) = fragment.key_id {
                trace!(session = %self.session_id, field = %field, "applying credential fragment");
                creds.insert(field, decode(&fragment.data));
            }
        }
        Ok(creds)
    }

    /// Persist a partial credential update
    ///
    /// Configured fragment fields are written as their own rows; everything
    /// else is merged onto the stored base credentials, newest value winning.
    pub async fn save_creds(&self, update: AuthCredentials) -> HiveResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut update = update;
        let fragments = update.extract(&self.fragment_keys);
        for (field, value) in &fragments {
            self.storage.upsert_auth_state(&AuthStateRecord::fragment(
                self.session_id.clone(),
                field.clone(),
                encode(value),
            ))?;
        }

        let mut base = self.read_base()?;
        for (field, value) in update.fields() {
            base.creds.insert(field.clone(), encode(value));
        }
        self.write_base(base)?;

        debug!(
            session = %self.session_id,
            fields = update.len(),
            fragments = fragments.len(),
            "saved credentials"
        );
        Ok(())
    }

    /// Remove every auth row of this session
    pub async fn clear(&self) -> HiveResult<()> {
        let _guard = self.write_lock.lock().await;
        let removed = self.storage.delete_auth_state(&self.session_id)?;
        debug!(session = %self.session_id, rows = removed, "cleared auth state");
        Ok(())
    }

    /// Whether any credentials were ever stored for this session
    pub async fn has_credentials(&self) -> HiveResult<bool> {
        let _guard = self.write_lock.lock().await;
        if self.storage.get_auth_state(&self.session_id, None)?.is_some() {
            return Ok(true);
        }
        Ok(!self.storage.list_auth_fragments(&self.session_id)?.is_empty())
    }

    fn read_base(&self) -> HiveResult<BaseRow> {
        match self.storage.get_auth_state(&self.session_id, None)? {
            Some(record) => BaseRow::from_data(record.data),
            None => Ok(BaseRow::default()),
        }
    }

    fn write_base(&self, base: BaseRow) -> HiveResult<()> {
        self.storage.upsert_auth_state(&AuthStateRecord::base(
            self.session_id.clone(),
            base.into_data(),
        ))?;
        Ok(())
    }
}

#[async_trait]
impl SignalKeyStore for AuthStateStore {
    async fn get_keys(
        &self,
        category: &str,
        ids: &[String],
    ) -> HiveResult<BTreeMap<String, AuthValue>> {
        let _guard = self.write_lock.lock().await;
        let base = self.read_base()?;

        let mut found = BTreeMap::new();
        for id in ids.iter().filter(|id| !id.is_empty()) {
            let fragment = if self.fragment_keys.contains(id) {
                self.storage.get_auth_state(&self.session_id, Some(id.as_str()))?
            } else {
                None
            };
            if let Some(fragment) = fragment {
                found.insert(id.clone(), decode(&fragment.data));
            } else if let Some(value) = base.keys.get(&signal_key(category, id)) {
                found.insert(id.clone(), decode(value));
            }
        }
        Ok(found)
    }

    async fn set_keys(&self, delta: SignalKeyDelta) -> HiveResult<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;

        let mut base = self.read_base()?;
        let mut written = 0usize;
        let mut deleted = 0usize;
        for (category, id, value) in delta.entries() {
            let key = signal_key(category, id);
            match value {
                Some(value) => {
                    base.keys.insert(key, encode(value));
                    written += 1;
                }
                None => {
                    base.keys.remove(&key);
                    deleted += 1;
                }
            }
        }
        self.write_base(base)?;

        trace!(session = %self.session_id, written, deleted, "updated signal keys");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::config::DEFAULT_FRAGMENT_KEYS;
    use hive_core::MemoryStorage;

    fn store_on(storage: Arc<dyn Storage>) -> Arc<AuthStateStore> {
        Arc::new(AuthStateStore::new(
            SessionId::new("alpha").unwrap(),
            storage,
            DEFAULT_FRAGMENT_KEYS.iter().map(|k| k.to_string()).collect(),
        ))
    }

    fn creds(entries: &[(&str, AuthValue)]) -> AuthCredentials {
        entries.iter().cloned().collect()
    }

    #[tokio::test]
    async fn test_first_run_is_empty() {
        let store = store_on(Arc::new(MemoryStorage::new()));
        let state = store.load().await.unwrap();
        assert!(state.creds.is_empty());
        assert!(!store.has_credentials().await.unwrap());
        assert!(state
            .keys
            .get_keys("pre-key", &["1".to_string()])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_save_merges_instead_of_overwriting() {
        let store = store_on(Arc::new(MemoryStorage::new()));
        store.save_creds(creds(&[("a", 1i64.into())])).await.unwrap();
        store.save_creds(creds(&[("b", 2i64.into())])).await.unwrap();

        let loaded = store.load_creds().await.unwrap();
        assert_eq!(loaded.get("a"), Some(&AuthValue::from(1i64)));
        assert_eq!(loaded.get("b"), Some(&AuthValue::from(2i64)));
    }

    #[tokio::test]
    async fn test_fragment_fields_get_their_own_rows() {
        let storage = Arc::new(MemoryStorage::new());
        let store = store_on(storage.clone());
        store
            .save_creds(creds(&[
                ("noiseKey", AuthValue::Bytes(vec![1, 2, 3])),
                ("registrationId", AuthValue::from(77u32)),
            ]))
            .await
            .unwrap();

        let alpha = SessionId::new("alpha").unwrap();
        let fragment = storage.get_auth_state(&alpha, Some("noiseKey")).unwrap().unwrap();
        assert_eq!(decode(&fragment.data), AuthValue::Bytes(vec![1, 2, 3]));

        let base = storage.get_auth_state(&alpha, None).unwrap().unwrap();
        assert!(base.data["creds"].get("noiseKey").is_none());
        assert_eq!(base.data["creds"]["registrationId"], serde_json::json!(77));
    }

    #[tokio::test]
    async fn test_fragment_fills_missing_base_field() {
        let storage = Arc::new(MemoryStorage::new());
        let alpha = SessionId::new("alpha").unwrap();
        storage
            .upsert_auth_state(&AuthStateRecord::base(
                alpha.clone(),
                serde_json::json!({"creds": {"me": "x"}, "keys": {}}),
            ))
            .unwrap();
        storage
            .upsert_auth_state(&AuthStateRecord::fragment(
                alpha,
                "noiseKey",
                encode(&AuthValue::Bytes(vec![9; 4])),
            ))
            .unwrap();

        let loaded = store_on(storage).load_creds().await.unwrap();
        assert_eq!(loaded.get("noiseKey"), Some(&AuthValue::Bytes(vec![9; 4])));
        assert_eq!(loaded.get("me").and_then(AuthValue::as_str), Some("x"));
    }

    #[tokio::test]
    async fn test_fragment_wins_over_base() {
        let storage = Arc::new(MemoryStorage::new());
        let alpha = SessionId::new("alpha").unwrap();
        storage
            .upsert_auth_state(&AuthStateRecord::base(
                alpha.clone(),
                serde_json::json!({"creds": {"noiseKey": "stale"}}),
            ))
            .unwrap();
        storage
            .upsert_auth_state(&AuthStateRecord::fragment(alpha, "noiseKey", serde_json::json!("fresh")))
            .unwrap();

        let loaded = store_on(storage).load_creds().await.unwrap();
        assert_eq!(loaded.get("noiseKey").and_then(AuthValue::as_str), Some("fresh"));
    }

    #[tokio::test]
    async fn test_signal_keys_set_get_delete() {
        let store = store_on(Arc::new(MemoryStorage::new()));
        let mut delta = SignalKeyDelta::new();
        delta
            .set("pre-key", "1", AuthValue::Bytes(vec![1]))
            .set("pre-key", "2", AuthValue::Bytes(vec![2]))
            .set("session", "abc", AuthValue::from("record"));
        store.set_keys(delta).await.unwrap();

        let ids = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let found = store.get_keys("pre-key", &ids).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("2"), Some(&AuthValue::Bytes(vec![2])));

        let mut delete = SignalKeyDelta::new();
        delete.delete("pre-key", "1");
        store.set_keys(delete).await.unwrap();

        let found = store.get_keys("pre-key", &ids).await.unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["2"]);
        let sessions = store.get_keys("session", &["abc".to_string()]).await.unwrap();
        assert_eq!(sessions.get("abc").and_then(AuthValue::as_str), Some("record"));
    }

    #[tokio::test]
    async fn test_empty_key_id_is_absent() {
        let store = store_on(Arc::new(MemoryStorage::new()));
        store.save_creds(creds(&[("me", "secret-identity".into())])).await.unwrap();

        let found = store.get_keys("pre-key", &["".to_string()]).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_fragment_lookup_skips_empty_ids() {
        let store = store_on(Arc::new(MemoryStorage::new()));
        store
            .save_creds(creds(&[("noiseKey", AuthValue::Bytes(vec![1, 2, 3]))]))
            .await
            .unwrap();

        let mut delta = SignalKeyDelta::new();
        delta.set("pre-key", "7", AuthValue::Bytes(vec![7]));
        store.set_keys(delta).await.unwrap();

        let ids = vec![String::new(), "noiseKey".to_string(), "7".to_string()];
        let found = store.get_keys("pre-key", &ids).await.unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["7", "noiseKey"]);
        assert_eq!(found.get("noiseKey"), Some(&AuthValue::Bytes(vec![1, 2, 3])));
    }

    #[tokio::test]
    async fn test_key_writes_keep_credentials() {
        let store = store_on(Arc::new(MemoryStorage::new()));
        store.save_creds(creds(&[("me", "x".into())])).await.unwrap();

        let mut delta = SignalKeyDelta::new();
        delta.set("pre-key", "1", AuthValue::Bytes(vec![1]));
        store.set_keys(delta).await.unwrap();
        store.save_creds(creds(&[("platform", "web".into())])).await.unwrap();

        assert_eq!(store.load_creds().await.unwrap().len(), 2);
        assert_eq!(store.get_keys("pre-key", &["1".to_string()]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_instance_reconstructs_state() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let original = creds(&[
            ("noiseKey", AuthValue::object([("public", AuthValue::Bytes(vec![1; 32]))])),
            ("advSecretKey", AuthValue::from("c2VjcmV0")),
            ("registrationId", AuthValue::from(9u32)),
            ("account", AuthValue::object([("details", AuthValue::Bytes(vec![0, 255]))])),
        ]);
        store_on(storage.clone()).save_creds(original.clone()).await.unwrap();

        let reloaded = store_on(storage).load().await.unwrap();
        assert_eq!(reloaded.creds, original);
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let store = store_on(Arc::new(MemoryStorage::new()));
        store
            .save_creds(creds(&[("noiseKey", AuthValue::Bytes(vec![1])), ("me", "x".into())]))
            .await
            .unwrap();
        assert!(store.has_credentials().await.unwrap());

        store.clear().await.unwrap();
        assert!(!store.has_credentials().await.unwrap());
        assert!(store.load_creds().await.unwrap().is_empty());
    }
}
