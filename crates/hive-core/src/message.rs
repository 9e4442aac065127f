//! Message Normalizer
//!
//! Maps the protocol's tagged union of wire payloads onto one normalized
//! record shape. Payloads are first parsed into [`MessagePayload`], a sum type
//! with one variant per known kind plus an explicit [`MessagePayload::Unknown`]
//! that preserves the raw payload for kinds not modeled yet.

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::codec::bytes_from_json;
use crate::wire::{parse_timestamp, WireMessage};

/// Envelope keys whose inner `message` carries the real payload
const ENVELOPE_KEYS: &[&str] = &[
    "ephemeralMessage",
    "viewOnceMessage",
    "viewOnceMessageV2",
    "viewOnceMessageV2Extension",
    "documentWithCaptionMessage",
    "editedMessage",
];

/// Deepest envelope nesting that is unwrapped
const MAX_ENVELOPE_DEPTH: usize = 4;

// ----------------------------------------------------------------------------
// Normalized Record
// ----------------------------------------------------------------------------

/// Normalized message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Conversation,
    ExtendedText,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    LiveLocation,
    Contact,
    ContactsArray,
    Reaction,
    PollCreate,
    PollUpdate,
    Interactive,
    Buttons,
    List,
    Template,
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Conversation => "conversation",
            MessageType::ExtendedText => "extended_text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::Audio => "audio",
            MessageType::Document => "document",
            MessageType::Sticker => "sticker",
            MessageType::Location => "location",
            MessageType::LiveLocation => "live_location",
            MessageType::Contact => "contact",
            MessageType::ContactsArray => "contacts_array",
            MessageType::Reaction => "reaction",
            MessageType::PollCreate => "poll_create",
            MessageType::PollUpdate => "poll_update",
            MessageType::Interactive => "interactive",
            MessageType::Buttons => "buttons",
            MessageType::List => "list",
            MessageType::Template => "template",
            MessageType::Unknown => "unknown",
        }
    }

    /// Parse the storage name; unrecognized names map to `Unknown`
    pub fn from_name(name: &str) -> Self {
        serde_json::from_value(Value::String(name.to_string())).unwrap_or(MessageType::Unknown)
    }
}

/// Reference to downloadable media
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_length: Option<u64>,
    /// Base64 of the plaintext SHA-256
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_sha256: Option<String>,
    /// Base64 of the ciphertext SHA-256
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_enc_sha256: Option<String>,
    /// Base64 media decryption key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// One wire message in normalized form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub text_content: Option<String>,
    pub media_ref: Option<MediaRef>,
    pub metadata: Map<String, Value>,
}

impl NormalizedMessage {
    fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            text_content: None,
            media_ref: None,
            metadata: Map::new(),
        }
    }

    fn text(mut self, text: Option<String>) -> Self {
        self.text_content = text;
        self
    }

    fn media(mut self, media: MediaRef) -> Self {
        self.media_ref = Some(media);
        self
    }

    fn meta(mut self, key: &str, value: Option<impl Into<Value>>) -> Self {
        if let Some(value) = value {
            self.metadata.insert(key.to_string(), value.into());
        }
        self
    }
}

// ----------------------------------------------------------------------------
// Payload Variants
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtendedTextMessage {
    pub text: Option<String>,
    pub matched_text: Option<String>,
    pub canonical_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextInfo {
    pub stanza_id: Option<String>,
    pub participant: Option<String>,
    pub is_forwarded: Option<bool>,
}

/// Shared shape of image, video, audio, document and sticker payloads
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaMessage {
    pub url: Option<String>,
    pub direct_path: Option<String>,
    pub mimetype: Option<String>,
    pub caption: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub file_length: Option<u64>,
    pub file_sha256: Option<Value>,
    pub file_enc_sha256: Option<Value>,
    pub media_key: Option<Value>,
    #[serde(deserialize_with = "lenient_u64")]
    pub seconds: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub width: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub height: Option<u64>,
    pub ptt: Option<bool>,
    pub gif_playback: Option<bool>,
    pub file_name: Option<String>,
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub page_count: Option<u64>,
    pub is_animated: Option<bool>,
    pub view_once: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationMessage {
    pub degrees_latitude: Option<f64>,
    pub degrees_longitude: Option<f64>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub url: Option<String>,
    pub comment: Option<String>,
    pub caption: Option<String>,
    pub accuracy_in_meters: Option<f64>,
    pub speed_in_mps: Option<f64>,
    pub sequence_number: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactMessage {
    pub display_name: Option<String>,
    pub vcard: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactsArrayMessage {
    pub display_name: Option<String>,
    pub contacts: Vec<ContactMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReactionMessage {
    pub key: Option<crate::wire::MessageKey>,
    pub text: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub sender_timestamp_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollOption {
    pub option_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollCreationMessage {
    pub name: Option<String>,
    pub options: Vec<PollOption>,
    #[serde(deserialize_with = "lenient_u64")]
    pub selectable_options_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollUpdateMessage {
    pub poll_creation_message_key: Option<crate::wire::MessageKey>,
    /// Encrypted vote, kept opaque
    pub vote: Option<Value>,
    #[serde(deserialize_with = "lenient_u64")]
    pub sender_timestamp_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextBlock {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InteractiveMessage {
    pub header: Option<Value>,
    pub body: Option<TextBlock>,
    pub footer: Option<TextBlock>,
    pub native_flow_message: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ButtonsMessage {
    pub content_text: Option<String>,
    pub footer_text: Option<String>,
    pub buttons: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListMessage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub button_text: Option<String>,
    pub footer_text: Option<String>,
    pub sections: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HydratedTemplate {
    pub hydrated_content_text: Option<String>,
    pub hydrated_footer_text: Option<String>,
    pub hydrated_buttons: Vec<Value>,
    pub template_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateMessage {
    pub hydrated_template: Option<HydratedTemplate>,
    pub hydrated_four_row_template: Option<HydratedTemplate>,
}

/// Parsed wire payload
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    Conversation(String),
    ExtendedText(ExtendedTextMessage),
    Image(MediaMessage),
    Video(MediaMessage),
    Audio(MediaMessage),
    Document(MediaMessage),
    Sticker(MediaMessage),
    Location(LocationMessage),
    LiveLocation(LocationMessage),
    Contact(ContactMessage),
    ContactsArray(ContactsArrayMessage),
    Reaction(ReactionMessage),
    PollCreate(PollCreationMessage),
    PollUpdate(PollUpdateMessage),
    Interactive(InteractiveMessage),
    Buttons(ButtonsMessage),
    List(ListMessage),
    Template(TemplateMessage),
    Unknown(Value),
}

/// Variant keys in dispatch order
const VARIANT_KEYS: &[&str] = &[
    "conversation",
    "extendedTextMessage",
    "imageMessage",
    "videoMessage",
    "audioMessage",
    "documentMessage",
    "stickerMessage",
    "locationMessage",
    "liveLocationMessage",
    "contactMessage",
    "contactsArrayMessage",
    "reactionMessage",
    "pollCreationMessage",
    "pollCreationMessageV2",
    "pollCreationMessageV3",
    "pollUpdateMessage",
    "interactiveMessage",
    "buttonsMessage",
    "listMessage",
    "templateMessage",
];

impl MessagePayload {
    /// Parse a raw payload; never fails
    pub fn parse(payload: &Value) -> Self {
        let Some(map) = payload.as_object() else {
            return MessagePayload::Unknown(payload.clone());
        };

        for key in VARIANT_KEYS {
            match map.get(*key) {
                None | Some(Value::Null) => continue,
                Some(inner) => {
                    return Self::parse_variant(key, inner)
                        .unwrap_or_else(|| MessagePayload::Unknown(payload.clone()))
                }
            }
        }
        MessagePayload::Unknown(payload.clone())
    }

    fn parse_variant(key: &str, inner: &Value) -> Option<Self> {
        let payload = match key {
            "conversation" => MessagePayload::Conversation(inner.as_str()?.to_string()),
            "extendedTextMessage" => MessagePayload::ExtendedText(read(inner)?),
            "imageMessage" => MessagePayload::Image(read(inner)?),
            "videoMessage" => MessagePayload::Video(read(inner)?),
            "audioMessage" => MessagePayload::Audio(read(inner)?),
            "documentMessage" => MessagePayload::Document(read(inner)?),
            "stickerMessage" => MessagePayload::Sticker(read(inner)?),
            "locationMessage" => MessagePayload::Location(read(inner)?),
            "liveLocationMessage" => MessagePayload::LiveLocation(read(inner)?),
            "contactMessage" => MessagePayload::Contact(read(inner)?),
            "contactsArrayMessage" => MessagePayload::ContactsArray(read(inner)?),
            "reactionMessage" => MessagePayload::Reaction(read(inner)?),
            "pollCreationMessage" | "pollCreationMessageV2" | "pollCreationMessageV3" => {
                MessagePayload::PollCreate(read(inner)?)
            }
            "pollUpdateMessage" => MessagePayload::PollUpdate(read(inner)?),
            "interactiveMessage" => MessagePayload::Interactive(read(inner)?),
            "buttonsMessage" => MessagePayload::Buttons(read(inner)?),
            "listMessage" => MessagePayload::List(read(inner)?),
            "templateMessage" => MessagePayload::Template(read(inner)?),
            _ => return None,
        };
        Some(payload)
    }

    /// Map this payload onto the normalized shape
    pub fn normalize(&self) -> NormalizedMessage {
        match self {
            MessagePayload::Conversation(text) => {
                NormalizedMessage::new(MessageType::Conversation).text(Some(text.clone()))
            }
            MessagePayload::ExtendedText(m) => NormalizedMessage::new(MessageType::ExtendedText)
                .text(m.text.clone())
                .meta("matchedText", m.matched_text.clone())
                .meta("canonicalUrl", m.canonical_url.clone())
                .meta("title", m.title.clone())
                .meta("description", m.description.clone())
                .meta(
                    "quotedMessageId",
                    m.context_info.as_ref().and_then(|c| c.stanza_id.clone()),
                )
                .meta(
                    "forwarded",
                    m.context_info.as_ref().and_then(|c| c.is_forwarded),
                ),
            MessagePayload::Image(m) => media(MessageType::Image, m),
            MessagePayload::Video(m) => media(MessageType::Video, m),
            MessagePayload::Audio(m) => media(MessageType::Audio, m),
            MessagePayload::Document(m) => media(MessageType::Document, m),
            MessagePayload::Sticker(m) => media(MessageType::Sticker, m),
            MessagePayload::Location(m) => NormalizedMessage::new(MessageType::Location)
                .text(m.name.clone().or_else(|| m.comment.clone()))
                .meta("latitude", m.degrees_latitude)
                .meta("longitude", m.degrees_longitude)
                .meta("name", m.name.clone())
                .meta("address", m.address.clone())
                .meta("url", m.url.clone()),
            MessagePayload::LiveLocation(m) => NormalizedMessage::new(MessageType::LiveLocation)
                .text(m.caption.clone())
                .meta("latitude", m.degrees_latitude)
                .meta("longitude", m.degrees_longitude)
                .meta("accuracyInMeters", m.accuracy_in_meters)
                .meta("speedInMps", m.speed_in_mps)
                .meta("sequenceNumber", m.sequence_number.as_ref().and_then(parse_timestamp)),
            MessagePayload::Contact(m) => NormalizedMessage::new(MessageType::Contact)
                .text(m.display_name.clone())
                .meta("vcard", m.vcard.clone()),
            MessagePayload::ContactsArray(m) => {
                let contacts: Vec<Value> = m
                    .contacts
                    .iter()
                    .map(|c| {
                        serde_json::json!({"displayName": c.display_name, "vcard": c.vcard})
                    })
                    .collect();
                NormalizedMessage::new(MessageType::ContactsArray)
                    .text(m.display_name.clone())
                    .meta("contacts", Some(contacts))
            }
            MessagePayload::Reaction(m) => {
                let key = m.key.as_ref();
                NormalizedMessage::new(MessageType::Reaction)
                    .text(m.text.clone())
                    .meta("targetMessageId", key.and_then(|k| k.id.clone()))
                    .meta("targetRemoteJid", key.and_then(|k| k.remote_jid.clone()))
                    .meta("targetFromMe", key.and_then(|k| k.from_me))
                    .meta("removed", m.text.as_deref().map(str::is_empty).filter(|r| *r))
                    .meta("senderTimestampMs", m.sender_timestamp_ms)
            }
            MessagePayload::PollCreate(m) => {
                let options: Vec<Value> = m
                    .options
                    .iter()
                    .filter_map(|o| o.option_name.clone().map(Value::String))
                    .collect();
                NormalizedMessage::new(MessageType::PollCreate)
                    .text(m.name.clone())
                    .meta("options", Some(options))
                    .meta("selectableCount", m.selectable_options_count)
            }
            MessagePayload::PollUpdate(m) => NormalizedMessage::new(MessageType::PollUpdate)
                .meta(
                    "pollCreationMessageId",
                    m.poll_creation_message_key
                        .as_ref()
                        .and_then(|k| k.id.clone()),
                )
                .meta("vote", m.vote.clone())
                .meta("senderTimestampMs", m.sender_timestamp_ms),
            MessagePayload::Interactive(m) => NormalizedMessage::new(MessageType::Interactive)
                .text(m.body.as_ref().and_then(|b| b.text.clone()))
                .meta("footer", m.footer.as_ref().and_then(|f| f.text.clone()))
                .meta("header", m.header.clone())
                .meta("nativeFlow", m.native_flow_message.clone()),
            MessagePayload::Buttons(m) => NormalizedMessage::new(MessageType::Buttons)
                .text(m.content_text.clone())
                .meta("footer", m.footer_text.clone())
                .meta("buttons", Some(m.buttons.clone())),
            MessagePayload::List(m) => NormalizedMessage::new(MessageType::List)
                .text(m.description.clone().or_else(|| m.title.clone()))
                .meta("title", m.title.clone())
                .meta("buttonText", m.button_text.clone())
                .meta("footer", m.footer_text.clone())
                .meta("sections", Some(m.sections.clone())),
            MessagePayload::Template(m) => {
                let hydrated = m
                    .hydrated_template
                    .as_ref()
                    .or(m.hydrated_four_row_template.as_ref());
                NormalizedMessage::new(MessageType::Template)
                    .text(hydrated.and_then(|t| t.hydrated_content_text.clone()))
                    .meta("footer", hydrated.and_then(|t| t.hydrated_footer_text.clone()))
                    .meta("templateId", hydrated.and_then(|t| t.template_id.clone()))
                    .meta("buttons", hydrated.map(|t| t.hydrated_buttons.clone()))
            }
            MessagePayload::Unknown(raw) => {
                NormalizedMessage::new(MessageType::Unknown).meta("raw", Some(raw.clone()))
            }
        }
    }
}

fn media(message_type: MessageType, m: &MediaMessage) -> NormalizedMessage {
    let media_ref = MediaRef {
        url: m.url.clone(),
        direct_path: m.direct_path.clone(),
        mimetype: m.mimetype.clone(),
        file_length: m.file_length,
        file_sha256: m.file_sha256.as_ref().and_then(base64_field),
        file_enc_sha256: m.file_enc_sha256.as_ref().and_then(base64_field),
        media_key: m.media_key.as_ref().and_then(base64_field),
        file_name: m.file_name.clone(),
    };
    NormalizedMessage::new(message_type)
        .text(m.caption.clone())
        .media(media_ref)
        .meta("seconds", m.seconds)
        .meta("width", m.width)
        .meta("height", m.height)
        .meta("ptt", m.ptt)
        .meta("gifPlayback", m.gif_playback)
        .meta("title", m.title.clone())
        .meta("pageCount", m.page_count)
        .meta("isAnimated", m.is_animated)
        .meta("viewOnce", m.view_once)
}

fn base64_field(value: &Value) -> Option<String> {
    bytes_from_json(value).map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn read<T: DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.clone()).ok()
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(parse_timestamp)
        .and_then(|n| u64::try_from(n).ok()))
}

// ----------------------------------------------------------------------------
// Entry Points
// ----------------------------------------------------------------------------

/// Normalize a raw wire payload
pub fn normalize(payload: &Value) -> NormalizedMessage {
    let (inner, envelope) = unwrap_envelopes(payload);
    let mut normalized = MessagePayload::parse(inner).normalize();
    if let Some(envelope) = envelope {
        normalized
            .metadata
            .insert("envelope".to_string(), Value::String(envelope.to_string()));
    }
    normalized
}

/// Normalize the payload of a wire message; a missing payload is `unknown`
pub fn normalize_wire(message: &WireMessage) -> NormalizedMessage {
    match &message.message {
        Some(payload) => normalize(payload),
        None => MessagePayload::Unknown(Value::Null).normalize(),
    }
}

/// Strip envelope wrappers, reporting the outermost one
fn unwrap_envelopes(payload: &Value) -> (&Value, Option<&'static str>) {
    let mut current = payload;
    let mut outermost = None;
    for _ in 0..MAX_ENVELOPE_DEPTH {
        let inner = ENVELOPE_KEYS.iter().find_map(|key| {
            current
                .get(*key)
                .and_then(|envelope| envelope.get("message"))
                .filter(|inner| inner.is_object())
                .map(|inner| (*key, inner))
        });
        match inner {
            Some((key, inner)) => {
                outermost.get_or_insert(key);
                current = inner;
            }
            None => break,
        }
    }
    (current, outermost)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conversation_normalizes_to_plain_text() {
        let normalized = normalize(&json!({"conversation": "hi"}));
        assert_eq!(
            serde_json::to_value(&normalized).unwrap(),
            json!({"type": "conversation", "textContent": "hi", "mediaRef": null, "metadata": {}})
        );
    }

    #[test]
    fn test_empty_payload_is_unknown_with_raw() {
        let normalized = normalize(&json!({}));
        assert_eq!(normalized.message_type, MessageType::Unknown);
        assert_eq!(normalized.metadata.get("raw"), Some(&json!({})));
        assert!(normalized.text_content.is_none());
    }

    #[test]
    fn test_unmodeled_kind_keeps_raw_payload() {
        let raw = json!({"protocolMessage": {"type": 0}, "messageContextInfo": {}});
        let normalized = normalize(&raw);
        assert_eq!(normalized.message_type, MessageType::Unknown);
        assert_eq!(normalized.metadata.get("raw"), Some(&raw));
    }

    #[test]
    fn test_wrong_shape_for_known_key_is_unknown() {
        let raw = json!({"imageMessage": "not-an-object"});
        let normalized = normalize(&raw);
        assert_eq!(normalized.message_type, MessageType::Unknown);
        assert_eq!(normalized.metadata.get("raw"), Some(&raw));
    }

    #[test]
    fn test_null_variant_is_skipped() {
        let normalized = normalize(&json!({"conversation": null, "extendedTextMessage": {"text": "x"}}));
        assert_eq!(normalized.message_type, MessageType::ExtendedText);
        assert_eq!(normalized.text_content.as_deref(), Some("x"));
    }

    #[test]
    fn test_image_extracts_media_reference() {
        let normalized = normalize(&json!({
            "imageMessage": {
                "url": "https://mmg.example/abc",
                "mimetype": "image/jpeg",
                "caption": "look",
                "fileLength": "2048",
                "mediaKey": {"kind": "bytes", "data": [1, 2, 3]},
                "width": 640,
                "height": 480
            }
        }));
        assert_eq!(normalized.message_type, MessageType::Image);
        assert_eq!(normalized.text_content.as_deref(), Some("look"));

        let media = normalized.media_ref.unwrap();
        assert_eq!(media.file_length, Some(2048));
        assert_eq!(media.media_key.as_deref(), Some("AQID"));
        assert_eq!(normalized.metadata.get("width"), Some(&json!(640)));
    }

    #[test]
    fn test_variant_table() {
        let cases = [
            (json!({"extendedTextMessage": {"text": "see https://a.b"}}), MessageType::ExtendedText, Some("see https://a.b")),
            (json!({"videoMessage": {"caption": "clip", "seconds": 3}}), MessageType::Video, Some("clip")),
            (json!({"audioMessage": {"ptt": true, "seconds": 4}}), MessageType::Audio, None),
            (json!({"documentMessage": {"fileName": "a.pdf", "caption": "doc"}}), MessageType::Document, Some("doc")),
            (json!({"stickerMessage": {"isAnimated": false}}), MessageType::Sticker, None),
            (json!({"locationMessage": {"degreesLatitude": 1.5, "degreesLongitude": 2.5, "name": "HQ"}}), MessageType::Location, Some("HQ")),
            (json!({"liveLocationMessage": {"degreesLatitude": 1.0, "caption": "omw"}}), MessageType::LiveLocation, Some("omw")),
            (json!({"contactMessage": {"displayName": "Ana", "vcard": "BEGIN:VCARD"}}), MessageType::Contact, Some("Ana")),
            (json!({"contactsArrayMessage": {"displayName": "2 contacts", "contacts": [{"displayName": "A"}]}}), MessageType::ContactsArray, Some("2 contacts")),
            (json!({"reactionMessage": {"text": "👍", "key": {"id": "M1"}}}), MessageType::Reaction, Some("👍")),
            (json!({"pollCreationMessageV3": {"name": "Lunch?", "options": [{"optionName": "yes"}]}}), MessageType::PollCreate, Some("Lunch?")),
            (json!({"pollUpdateMessage": {"pollCreationMessageKey": {"id": "P1"}}}), MessageType::PollUpdate, None),
            (json!({"interactiveMessage": {"body": {"text": "pick"}}}), MessageType::Interactive, Some("pick")),
            (json!({"buttonsMessage": {"contentText": "choose", "buttons": []}}), MessageType::Buttons, Some("choose")),
            (json!({"listMessage": {"title": "Menu", "description": "today"}}), MessageType::List, Some("today")),
            (json!({"templateMessage": {"hydratedTemplate": {"hydratedContentText": "hello"}}}), MessageType::Template, Some("hello")),
        ];

        for (payload, expected_type, expected_text) in cases {
            let normalized = normalize(&payload);
            assert_eq!(normalized.message_type, expected_type, "payload {payload}");
            assert_eq!(normalized.text_content.as_deref(), expected_text, "payload {payload}");
        }
    }

    #[test]
    fn test_reaction_removal_flag() {
        let normalized = normalize(&json!({"reactionMessage": {"text": "", "key": {"id": "M1"}}}));
        assert_eq!(normalized.metadata.get("removed"), Some(&json!(true)));
        assert_eq!(normalized.metadata.get("targetMessageId"), Some(&json!("M1")));
    }

    #[test]
    fn test_envelopes_are_unwrapped() {
        let normalized = normalize(&json!({
            "ephemeralMessage": {"message": {"viewOnceMessage": {"message": {"imageMessage": {"caption": "once"}}}}}
        }));
        assert_eq!(normalized.message_type, MessageType::Image);
        assert_eq!(normalized.text_content.as_deref(), Some("once"));
        assert_eq!(normalized.metadata.get("envelope"), Some(&json!("ephemeralMessage")));
    }

    #[test]
    fn test_missing_payload_is_unknown() {
        let normalized = normalize_wire(&WireMessage::default());
        assert_eq!(normalized.message_type, MessageType::Unknown);
        assert_eq!(normalized.metadata.get("raw"), Some(&Value::Null));
    }

    #[test]
    fn test_message_type_names() {
        assert_eq!(MessageType::from_name("live_location"), MessageType::LiveLocation);
        assert_eq!(MessageType::from_name("hologram"), MessageType::Unknown);
        assert_eq!(MessageType::PollCreate.as_str(), "poll_create");
    }
}
