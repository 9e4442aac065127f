//! Credential Codec
//!
//! Pure functions converting credential trees to a storage-safe JSON form and
//! back. Binary sequences become tagged records so that they survive any
//! serialization format without corruption:
//!
//! ```text
//! [1, 2, 3] as bytes  <->  {"kind": "bytes", "data": [1, 2, 3]}
//! ```
//!
//! Encoding never fails. Structured protocol values are reduced through their
//! canonical form when one is available and walked field by field otherwise.

use std::collections::BTreeMap;

use base64::Engine as _;
use serde_json::{Map, Value};
use tracing::trace;

use crate::auth::{AuthCredentials, AuthValue, StructuredValue};

/// Tag key of an encoded binary record
pub const KIND_KEY: &str = "kind";
/// Tag value of an encoded binary record
pub const BYTES_KIND: &str = "bytes";
/// Payload key of an encoded binary record
pub const DATA_KEY: &str = "data";

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

/// Encode a credential value into its storage form
pub fn encode(value: &AuthValue) -> Value {
    match value {
        AuthValue::Null => Value::Null,
        AuthValue::Bool(b) => Value::Bool(*b),
        AuthValue::Number(n) => Value::Number(n.clone()),
        AuthValue::String(s) => Value::String(s.clone()),
        AuthValue::Bytes(bytes) => encode_bytes(bytes),
        AuthValue::Array(items) => Value::Array(items.iter().map(encode).collect()),
        AuthValue::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), encode(value)))
                .collect(),
        ),
        AuthValue::Structured(structured) => encode_structured(structured.as_ref()),
    }
}

/// Encode a whole credential bag as one JSON object
pub fn encode_map(creds: &AuthCredentials) -> Value {
    Value::Object(
        creds
            .fields()
            .map(|(key, value)| (key.clone(), encode(value)))
            .collect(),
    )
}

fn encode_bytes(bytes: &[u8]) -> Value {
    let mut record = Map::with_capacity(2);
    record.insert(KIND_KEY.to_string(), Value::String(BYTES_KIND.to_string()));
    record.insert(
        DATA_KEY.to_string(),
        Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    );
    Value::Object(record)
}

fn encode_structured(structured: &dyn StructuredValue) -> Value {
    match structured.to_canonical() {
        // A canonical form that is itself structured would recurse forever
        Ok(AuthValue::Structured(_)) => walk_fields(structured),
        Ok(canonical) => encode(&canonical),
        Err(err) => {
            trace!(
                type_name = structured.type_name(),
                error = %err,
                "canonical conversion unavailable, walking fields"
            );
            walk_fields(structured)
        }
    }
}

fn walk_fields(structured: &dyn StructuredValue) -> Value {
    Value::Object(
        structured
            .fields()
            .iter()
            .map(|(key, value)| (key.clone(), encode(value)))
            .collect(),
    )
}

// ----------------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------------

/// Decode a storage form back into a credential value
pub fn decode(value: &Value) -> AuthValue {
    match value {
        Value::Null => AuthValue::Null,
        Value::Bool(b) => AuthValue::Bool(*b),
        Value::Number(n) => AuthValue::Number(n.clone()),
        Value::String(s) => AuthValue::String(s.clone()),
        Value::Array(items) => AuthValue::Array(items.iter().map(decode).collect()),
        Value::Object(map) => match tagged_bytes(map) {
            Some(bytes) => AuthValue::Bytes(bytes),
            None => AuthValue::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), decode(value)))
                    .collect(),
            ),
        },
    }
}

/// Decode a stored credential object; anything else yields an empty bag
pub fn decode_map(value: &Value) -> AuthCredentials {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| (key.clone(), decode(value)))
            .collect::<BTreeMap<_, _>>()
            .into(),
        _ => AuthCredentials::new(),
    }
}

/// Recognize a well-formed `{"kind": "bytes", "data": [...]}` record
fn tagged_bytes(map: &Map<String, Value>) -> Option<Vec<u8>> {
    if map.len() != 2 || map.get(KIND_KEY)?.as_str()? != BYTES_KIND {
        return None;
    }
    byte_array(map.get(DATA_KEY)?.as_array()?)
}

fn byte_array(items: &[Value]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

// ----------------------------------------------------------------------------
// Wire Helpers
// ----------------------------------------------------------------------------

/// Read a binary field from a wire payload
///
/// Accepts the tagged record form, a plain integer array, a base64 string or
/// an index-keyed object (`{"0": 1, "1": 2}`) as produced by typed-array JSON.
pub fn bytes_from_json(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Array(items) => byte_array(items),
        Value::String(s) => base64::engine::general_purpose::STANDARD.decode(s).ok(),
        Value::Object(map) => tagged_bytes(map).or_else(|| indexed_bytes(map)),
        _ => None,
    }
}

fn indexed_bytes(map: &Map<String, Value>) -> Option<Vec<u8>> {
    if map.is_empty() {
        return None;
    }
    let mut out = vec![0u8; map.len()];
    for (key, value) in map {
        let index: usize = key.parse().ok()?;
        let byte = value.as_u64().and_then(|n| u8::try_from(n).ok())?;
        *out.get_mut(index)? = byte;
    }
    Some(out)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
