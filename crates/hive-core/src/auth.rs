//! Authentication value model
//!
//! Protocol credentials are a mixed tree of plain fields, raw key material and
//! structured protocol-library records. [`AuthValue`] models that tree,
//! [`AuthCredentials`] is the per-session credential bag and [`SignalKeyDelta`]
//! carries categorized writes into the flat signal keyspace.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec;
use crate::errors::{CodecError, HiveResult};

// ----------------------------------------------------------------------------
// Structured Values
// ----------------------------------------------------------------------------

/// An opaque value produced by a protocol library
///
/// The codec first asks for a canonical form; when that is unavailable it
/// falls back to walking [`StructuredValue::fields`].
pub trait StructuredValue: fmt::Debug + Send + Sync {
    /// Type name used in diagnostics
    fn type_name(&self) -> &str;

    /// Reduce to a plain value tree
    fn to_canonical(&self) -> Result<AuthValue, CodecError> {
        Err(CodecError::Unsupported {
            type_name: self.type_name().to_string(),
        })
    }

    /// Named fields for structural walking
    fn fields(&self) -> Vec<(String, AuthValue)>;
}

// ----------------------------------------------------------------------------
// Auth Value
// ----------------------------------------------------------------------------

/// One node of a credential tree
#[derive(Debug, Clone)]
pub enum AuthValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<AuthValue>),
    Object(BTreeMap<String, AuthValue>),
    Structured(Arc<dyn StructuredValue>),
}

impl AuthValue {
    /// Build an object value from key/value pairs
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, AuthValue)>,
    {
        AuthValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Wrap a structured protocol value
    pub fn structured<S: StructuredValue + 'static>(value: S) -> Self {
        AuthValue::Structured(Arc::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AuthValue::Null)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AuthValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AuthValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AuthValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, AuthValue>> {
        match self {
            AuthValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a field of an object value
    pub fn get(&self, key: &str) -> Option<&AuthValue> {
        self.as_object().and_then(|map| map.get(key))
    }
}

impl PartialEq for AuthValue {
    fn eq(&self, other: &Self) -> bool {
        use AuthValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Number(a), Number(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (Structured(_), _) | (_, Structured(_)) => codec::encode(self) == codec::encode(other),
            _ => false,
        }
    }
}

impl From<bool> for AuthValue {
    fn from(value: bool) -> Self {
        AuthValue::Bool(value)
    }
}

impl From<i64> for AuthValue {
    fn from(value: i64) -> Self {
        AuthValue::Number(value.into())
    }
}

impl From<u64> for AuthValue {
    fn from(value: u64) -> Self {
        AuthValue::Number(value.into())
    }
}

impl From<u32> for AuthValue {
    fn from(value: u32) -> Self {
        AuthValue::Number(value.into())
    }
}

impl From<&str> for AuthValue {
    fn from(value: &str) -> Self {
        AuthValue::String(value.to_string())
    }
}

impl From<String> for AuthValue {
    fn from(value: String) -> Self {
        AuthValue::String(value)
    }
}

impl From<Vec<u8>> for AuthValue {
    fn from(value: Vec<u8>) -> Self {
        AuthValue::Bytes(value)
    }
}

impl<const N: usize> From<[u8; N]> for AuthValue {
    fn from(value: [u8; N]) -> Self {
        AuthValue::Bytes(value.to_vec())
    }
}

impl<T: Into<AuthValue>> From<Option<T>> for AuthValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(AuthValue::Null)
    }
}

impl Serialize for AuthValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        codec::encode(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AuthValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(codec::decode(&value))
    }
}

// ----------------------------------------------------------------------------
// Credentials
// ----------------------------------------------------------------------------

/// The credential bag of one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthCredentials(BTreeMap<String, AuthValue>);

impl AuthCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&AuthValue> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<AuthValue>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<AuthValue> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &AuthValue)> {
        self.0.iter()
    }

    /// Shallow merge: every field of `newer` replaces the same field here
    pub fn merge(&mut self, newer: AuthCredentials) {
        self.0.extend(newer.0);
    }

    /// Move the named fields out of this bag
    pub fn extract(&mut self, names: &[String]) -> Vec<(String, AuthValue)> {
        names
            .iter()
            .filter_map(|name| self.0.remove_entry(name.as_str()))
            .collect()
    }

    pub fn as_map(&self) -> &BTreeMap<String, AuthValue> {
        &self.0
    }

    pub fn into_map(self) -> BTreeMap<String, AuthValue> {
        self.0
    }
}

impl From<BTreeMap<String, AuthValue>> for AuthCredentials {
    fn from(map: BTreeMap<String, AuthValue>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, AuthValue)> for AuthCredentials {
    fn from_iter<I: IntoIterator<Item = (K, AuthValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// ----------------------------------------------------------------------------
// Signal Keys
// ----------------------------------------------------------------------------

/// Flat signal keyspace, keyed by `"<category>-<id>"`
pub type SignalKeys = BTreeMap<String, AuthValue>;

/// Flat keyspace entry name for a category and id
pub fn signal_key(category: &str, id: &str) -> String {
    format!("{}-{}", category, id)
}

/// Categorized batch of signal key writes; `None` deletes the entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalKeyDelta(BTreeMap<String, BTreeMap<String, Option<AuthValue>>>);

impl SignalKeyDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write of `value` under `category`/`id`
    pub fn set(&mut self, category: &str, id: &str, value: impl Into<AuthValue>) -> &mut Self {
        self.0
            .entry(category.to_string())
            .or_default()
            .insert(id.to_string(), Some(value.into()));
        self
    }

    /// Record a deletion of `category`/`id`
    pub fn delete(&mut self, category: &str, id: &str) -> &mut Self {
        self.0
            .entry(category.to_string())
            .or_default()
            .insert(id.to_string(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }

    /// All `(category, id, value)` triples
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, Option<&AuthValue>)> {
        self.0.iter().flat_map(|(category, ids)| {
            ids.iter()
                .map(move |(id, value)| (category.as_str(), id.as_str(), value.as_ref()))
        })
    }
}

// ----------------------------------------------------------------------------
// Engine-Facing Auth State
// ----------------------------------------------------------------------------

/// Signal keyspace access handed to the protocol engine
#[async_trait]
pub trait SignalKeyStore: Send + Sync {
    /// Batch lookup; missing ids are absent from the result
    async fn get_keys(&self, category: &str, ids: &[String])
        -> HiveResult<BTreeMap<String, AuthValue>>;

    /// Apply a categorized batch of writes and deletions
    async fn set_keys(&self, delta: SignalKeyDelta) -> HiveResult<()>;
}

/// Credentials plus keyspace handle a socket is bound to
#[derive(Clone)]
pub struct AuthState {
    pub creds: AuthCredentials,
    pub keys: Arc<dyn SignalKeyStore>,
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("creds", &self.creds.as_map().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_older_fields() {
        let mut creds: AuthCredentials = [("a", AuthValue::from(1i64))].into_iter().collect();
        let newer: AuthCredentials = [("b", AuthValue::from(2i64))].into_iter().collect();
        creds.merge(newer);

        assert_eq!(creds.get("a"), Some(&AuthValue::from(1i64)));
        assert_eq!(creds.get("b"), Some(&AuthValue::from(2i64)));
    }

    #[test]
    fn test_merge_newer_wins_per_field() {
        let mut creds: AuthCredentials = [("me", AuthValue::from("old"))].into_iter().collect();
        creds.merge([("me", AuthValue::from("new"))].into_iter().collect());
        assert_eq!(creds.get("me").and_then(AuthValue::as_str), Some("new"));
    }

    #[test]
    fn test_extract_moves_named_fields() {
        let mut creds: AuthCredentials = [
            ("noiseKey", AuthValue::from(vec![1u8, 2])),
            ("registrationId", AuthValue::from(7u32)),
        ]
        .into_iter()
        .collect();

        let taken = creds.extract(&["noiseKey".to_string(), "signedPreKey".to_string()]);
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].0, "noiseKey");
        assert!(!creds.contains("noiseKey"));
        assert!(creds.contains("registrationId"));
    }

    #[test]
    fn test_signal_key_delta_entries() {
        let mut delta = SignalKeyDelta::new();
        delta.set("pre-key", "1", vec![9u8]).delete("session", "abc");

        let entries: Vec<_> = delta.entries().collect();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&("pre-key", "1", Some(&AuthValue::Bytes(vec![9])))));
        assert!(entries.contains(&("session", "abc", None)));
        assert_eq!(signal_key("pre-key", "1"), "pre-key-1");
    }
}
