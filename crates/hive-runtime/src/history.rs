//! Bulk History Ingestor
//!
//! Consumes backfill batches delivered on first connection, normalizes their
//! messages and persists contacts, chats and messages in transactional chunks.
//! Every write is keyed by `(session, remote id)` or `(session, message id)`,
//! so replaying a batch never duplicates rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use hive_core::wire::parse_timestamp;
use hive_core::{
    normalize_wire, ChatRecord, ContactRecord, HiveResult, HistoryBatch, MessageRecord, SessionId,
    Storage, StorageResult, WireChat, WireContact, WireMessage,
};

// ----------------------------------------------------------------------------
// Progress and Reports
// ----------------------------------------------------------------------------

/// Running counters of one session's backfill
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySyncProgress {
    pub contacts: usize,
    pub chats: usize,
    /// Messages newly inserted; replays do not count twice
    pub messages: usize,
    pub skipped_messages: usize,
    pub batches: usize,
    /// Last completion percentage reported by the engine
    pub last_progress: Option<u32>,
    pub started_at: DateTime<Utc>,
}

impl HistorySyncProgress {
    fn new() -> Self {
        Self {
            contacts: 0,
            chats: 0,
            messages: 0,
            skipped_messages: 0,
            batches: 0,
            last_progress: None,
            started_at: Utc::now(),
        }
    }
}

/// Outcome of one ingested batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub contacts: usize,
    pub chats: usize,
    pub messages: usize,
    pub skipped_messages: usize,
    pub failed_chunks: usize,
    /// The sync finished and its progress entry was cleared
    pub completed: bool,
}

// ----------------------------------------------------------------------------
// History Ingestor
// ----------------------------------------------------------------------------

/// Persists backfill batches for all sessions
pub struct HistoryIngestor {
    storage: Arc<dyn Storage>,
    chunk_size: usize,
    progress: DashMap<SessionId, HistorySyncProgress>,
}

impl HistoryIngestor {
    pub fn new(storage: Arc<dyn Storage>, chunk_size: usize) -> Self {
        Self {
            storage,
            chunk_size: chunk_size.max(1),
            progress: DashMap::new(),
        }
    }

    /// Persist one backfill batch
    ///
    /// Chunk failures are logged and counted; they never abort the batch and
    /// they keep the progress entry alive even when the batch is the last one.
    pub async fn ingest(&self, session_id: &SessionId, batch: HistoryBatch) -> IngestReport {
        if !self.progress.contains_key(session_id) {
            info!(session = %session_id, "history sync started");
            self.progress
                .insert(session_id.clone(), HistorySyncProgress::new());
        }

        let mut report = IngestReport::default();

        let contacts: Vec<ContactRecord> = batch
            .contacts
            .iter()
            .filter_map(|contact| contact_record(session_id, contact))
            .collect();
        for chunk in contacts.chunks(self.chunk_size) {
            let result = self.storage.upsert_contacts(chunk);
            report.contacts += written(session_id, "contacts", result, &mut report.failed_chunks);
            tokio::task::yield_now().await;
        }

        let chats: Vec<ChatRecord> = batch
            .chats
            .iter()
            .filter_map(|chat| chat_record(session_id, chat))
            .collect();
        for chunk in chats.chunks(self.chunk_size) {
            let result = self.storage.upsert_chats(chunk);
            report.chats += written(session_id, "chats", result, &mut report.failed_chunks);
            tokio::task::yield_now().await;
        }

        let (messages, skipped) = message_records(session_id, &batch.messages);
        report.skipped_messages = skipped;
        for chunk in messages.chunks(self.chunk_size) {
            let result = self.storage.insert_messages(chunk);
            report.messages += written(session_id, "messages", result, &mut report.failed_chunks);
            tokio::task::yield_now().await;
        }

        match self.progress.get_mut(session_id) {
            Some(mut progress) => {
                progress.contacts += report.contacts;
                progress.chats += report.chats;
                progress.messages += report.messages;
                progress.skipped_messages += report.skipped_messages;
                progress.batches += 1;
                if batch.progress.is_some() {
                    progress.last_progress = batch.progress;
                }
            }
            None => debug!(session = %session_id, "history sync cancelled during batch"),
        }

        debug!(
            session = %session_id,
            contacts = report.contacts,
            chats = report.chats,
            messages = report.messages,
            skipped = report.skipped_messages,
            failed_chunks = report.failed_chunks,
            "history batch ingested"
        );

        if batch.is_latest {
            if report.failed_chunks == 0 {
                if let Some((_, progress)) = self.progress.remove(session_id) {
                    info!(
                        session = %session_id,
                        contacts = progress.contacts,
                        chats = progress.chats,
                        messages = progress.messages,
                        batches = progress.batches,
                        "history sync complete"
                    );
                }
                report.completed = true;
            } else {
                warn!(
                    session = %session_id,
                    failed_chunks = report.failed_chunks,
                    "final history batch had failures, keeping progress"
                );
            }
        }

        report
    }

    /// Persist live messages outside any backfill; returns rows inserted
    pub async fn store_messages(
        &self,
        session_id: &SessionId,
        messages: &[WireMessage],
    ) -> HiveResult<usize> {
        let (records, skipped) = message_records(session_id, messages);
        if skipped > 0 {
            debug!(session = %session_id, skipped, "skipped unaddressable live messages");
        }
        let mut inserted = 0;
        for chunk in records.chunks(self.chunk_size) {
            inserted += self.storage.insert_messages(chunk)?;
        }
        Ok(inserted)
    }

    /// Drop a session's progress without persisting anything
    pub fn cancel(&self, session_id: &SessionId) -> bool {
        let cancelled = self.progress.remove(session_id).is_some();
        if cancelled {
            info!(session = %session_id, "history sync cancelled");
        }
        cancelled
    }

    /// Snapshot of a session's progress
    pub fn progress(&self, session_id: &SessionId) -> Option<HistorySyncProgress> {
        self.progress.get(session_id).map(|entry| entry.value().clone())
    }

    pub fn active_syncs(&self) -> usize {
        self.progress.len()
    }
}

/// Rows written by a chunk; a failed chunk counts as zero
fn written(
    session_id: &SessionId,
    kind: &'static str,
    result: StorageResult<usize>,
    failed_chunks: &mut usize,
) -> usize {
    match result {
        Ok(rows) => rows,
        Err(err) => {
            error!(session = %session_id, kind, error = %err, "failed to persist history chunk");
            *failed_chunks += 1;
            0
        }
    }
}

// ----------------------------------------------------------------------------
// Record Mapping
// ----------------------------------------------------------------------------

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
}

/// Map a wire contact; contacts without an id are dropped
pub fn contact_record(session_id: &SessionId, contact: &WireContact) -> Option<ContactRecord> {
    Some(ContactRecord {
        session_id: session_id.clone(),
        remote_id: non_empty(&contact.id)?,
        name: contact.name.clone(),
        notify: contact.notify.clone(),
        verified_name: contact.verified_name.clone(),
        img_url: contact.img_url.clone(),
        status: contact.status.clone(),
    })
}

/// Map a wire chat; chats without an id are dropped
pub fn chat_record(session_id: &SessionId, chat: &WireChat) -> Option<ChatRecord> {
    Some(ChatRecord {
        session_id: session_id.clone(),
        remote_id: non_empty(&chat.id)?,
        name: chat.name.clone(),
        unread_count: chat.unread_count,
        conversation_timestamp: chat.conversation_timestamp.as_ref().and_then(parse_timestamp),
        archived: chat.archived,
        pinned: chat.pinned.as_ref().and_then(parse_timestamp),
        mute_end_time: chat.mute_end_time.as_ref().and_then(parse_timestamp),
        read_only: chat.read_only,
    })
}

/// Map and normalize a wire message; `None` when it lacks an id or remote id
pub fn message_record(session_id: &SessionId, message: &WireMessage) -> Option<MessageRecord> {
    let message_id = message.id()?.to_string();
    let remote_id = message.remote_id()?.to_string();
    Some(MessageRecord {
        session_id: session_id.clone(),
        message_id,
        remote_id,
        from_me: message.key.from_me.unwrap_or(false),
        participant: non_empty(&message.key.participant),
        push_name: message.push_name.clone(),
        timestamp: message.timestamp(),
        content: normalize_wire(message),
    })
}

/// Map a batch, returning records and the number skipped
fn message_records(session_id: &SessionId, messages: &[WireMessage]) -> (Vec<MessageRecord>, usize) {
    let records: Vec<MessageRecord> = messages
        .iter()
        .filter_map(|message| message_record(session_id, message))
        .collect();
    let skipped = messages.len() - records.len();
    (records, skipped)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
