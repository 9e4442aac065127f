//! Wire shapes delivered by the protocol engine
//!
//! These mirror the engine's JSON payloads loosely: every field is optional so
//! that a malformed item can be recognized and skipped instead of failing the
//! whole batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

/// Addressing key of a wire message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageKey {
    pub remote_jid: Option<String>,
    pub from_me: Option<bool>,
    pub id: Option<String>,
    pub participant: Option<String>,
}

/// One message as delivered by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireMessage {
    pub key: MessageKey,
    /// Raw payload: a tagged union keyed by the message kind
    pub message: Option<Value>,
    pub message_timestamp: Option<Value>,
    pub push_name: Option<String>,
    pub status: Option<Value>,
}

impl WireMessage {
    /// Message id, if present and non-empty
    pub fn id(&self) -> Option<&str> {
        self.key.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Remote chat id, if present and non-empty
    pub fn remote_id(&self) -> Option<&str> {
        self.key.remote_jid.as_deref().filter(|jid| !jid.is_empty())
    }

    /// Whether the message carries both identifiers needed to persist it
    pub fn is_addressable(&self) -> bool {
        self.id().is_some() && self.remote_id().is_some()
    }

    /// Send time in seconds since the epoch
    pub fn timestamp(&self) -> Option<i64> {
        self.message_timestamp.as_ref().and_then(parse_timestamp)
    }
}

/// Kind of a live `messages.upsert` delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertKind {
    /// New message received in real time
    Notify,
    /// Message appended from another device or a resync
    Append,
}

// ----------------------------------------------------------------------------
// Contacts and Chats
// ----------------------------------------------------------------------------

/// Contact entry from a backfill batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireContact {
    pub id: Option<String>,
    pub name: Option<String>,
    pub notify: Option<String>,
    pub verified_name: Option<String>,
    pub img_url: Option<String>,
    pub status: Option<String>,
}

/// Chat entry from a backfill batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireChat {
    pub id: Option<String>,
    pub name: Option<String>,
    pub unread_count: Option<i64>,
    pub conversation_timestamp: Option<Value>,
    pub archived: Option<bool>,
    pub pinned: Option<Value>,
    pub mute_end_time: Option<Value>,
    pub read_only: Option<bool>,
}

// ----------------------------------------------------------------------------
// Backfill Batch
// ----------------------------------------------------------------------------

/// One history-sync delivery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryBatch {
    pub contacts: Vec<WireContact>,
    pub chats: Vec<WireChat>,
    pub messages: Vec<WireMessage>,
    /// Set on the final batch of a sync
    pub is_latest: bool,
    /// Engine-reported completion percentage
    pub progress: Option<u32>,
    pub sync_type: Option<String>,
}

impl HistoryBatch {
    pub fn item_count(&self) -> usize {
        self.contacts.len() + self.chats.len() + self.messages.len()
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Read a wire timestamp
///
/// Accepts integers, numeric strings and `{low, high}` 64-bit longs.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(map) => {
            let low = map.get("low")?.as_i64()?;
            let high = map.get("high").and_then(Value::as_i64).unwrap_or(0);
            Some((high << 32) | (low & 0xFFFF_FFFF))
        }
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_timestamp_shapes() {
        assert_eq!(parse_timestamp(&json!(1700000000)), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("1700000000")), Some(1_700_000_000));
        assert_eq!(
            parse_timestamp(&json!({"low": 1700000000, "high": 0, "unsigned": true})),
            Some(1_700_000_000)
        );
        assert_eq!(parse_timestamp(&json!({"low": 0, "high": 1})), Some(1 << 32));
        assert_eq!(parse_timestamp(&json!(null)), None);
        assert_eq!(parse_timestamp(&json!("soon")), None);
    }

    #[test]
    fn test_wire_message_addressability() {
        let message: WireMessage = serde_json::from_value(json!({
            "key": {"remoteJid": "123@s.whatsapp.net", "fromMe": false, "id": "ABC"},
            "message": {"conversation": "hi"},
            "messageTimestamp": 1700000000
        }))
        .unwrap();
        assert!(message.is_addressable());
        assert_eq!(message.timestamp(), Some(1_700_000_000));

        let missing_id: WireMessage =
            serde_json::from_value(json!({"key": {"remoteJid": "123@s.whatsapp.net", "id": ""}}))
                .unwrap();
        assert!(!missing_id.is_addressable());
    }

    #[test]
    fn test_history_batch_defaults() {
        let batch: HistoryBatch = serde_json::from_value(json!({"isLatest": true})).unwrap();
        assert!(batch.is_latest);
        assert_eq!(batch.item_count(), 0);
        assert_eq!(batch.progress, None);
    }
}
