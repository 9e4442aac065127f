//! Command handlers for the Hive CLI
//!
//! Handlers write to any `io::Write` so the binary prints to stdout and tests
//! capture into a buffer.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::DateTime;
use serde_json::{json, Value};
use tracing::{info, warn};

use hive_core::codec::encode_map;
use hive_core::{AuthValue, HistoryBatch, HiveConfig, SessionId, SessionRecord, Storage};
use hive_runtime::{AuthStateStore, HistoryIngestor, IngestReport};

use crate::cli::Commands;
use crate::error::{CliError, Result};

/// Leading bytes shown for binary credential fields
const PREVIEW_BYTES: usize = 12;

/// Characters shown for text columns
const PREVIEW_CHARS: usize = 60;

/// Everything a command needs
pub struct CliContext {
    pub config: HiveConfig,
    pub storage: Arc<dyn Storage>,
    pub json: bool,
}

impl CliContext {
    pub fn new(config: HiveConfig, storage: Arc<dyn Storage>, json: bool) -> Self {
        Self {
            config,
            storage,
            json,
        }
    }

    fn auth_store(&self, session: &SessionId) -> AuthStateStore {
        AuthStateStore::new(
            session.clone(),
            self.storage.clone(),
            self.config.auth.fragment_keys.clone(),
        )
    }
}

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(command: Commands, ctx: &CliContext, out: &mut dyn Write) -> Result<()> {
        match command {
            Commands::Sessions => Self::handle_sessions(ctx, out),
            Commands::Auth { session } => Self::handle_auth(ctx, out, &parse_session(&session)?).await,
            Commands::History {
                session,
                chat,
                limit,
            } => Self::handle_history(ctx, out, &parse_session(&session)?, chat.as_deref(), limit),
            Commands::ImportHistory { session, file } => {
                Self::handle_import(ctx, out, &parse_session(&session)?, &file).await
            }
            Commands::Purge { session, yes } => {
                Self::handle_purge(ctx, out, &parse_session(&session)?, yes).await
            }
            Commands::Config => {
                serde_json::to_writer_pretty(&mut *out, &ctx.config)?;
                writeln!(out)?;
                Ok(())
            }
        }
    }

    fn handle_sessions(ctx: &CliContext, out: &mut dyn Write) -> Result<()> {
        let sessions = ctx.storage.list_sessions()?;

        if ctx.json {
            let mut rows = Vec::with_capacity(sessions.len());
            for record in &sessions {
                let counts = ctx.storage.history_counts(&record.id)?;
                rows.push(json!({ "session": record, "history": counts }));
            }
            serde_json::to_writer_pretty(&mut *out, &rows)?;
            writeln!(out)?;
            return Ok(());
        }

        if sessions.is_empty() {
            writeln!(out, "No sessions stored")?;
            return Ok(());
        }
        writeln!(
            out,
            "{:<20} {:<12} {:<20} {:>8} {:>8} {:>10}",
            "SESSION", "STATUS", "LAST CONNECTED", "CONTACTS", "CHATS", "MESSAGES"
        )?;
        for record in &sessions {
            let counts = ctx.storage.history_counts(&record.id)?;
            let last = record
                .last_connected
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                out,
                "{:<20} {:<12} {:<20} {:>8} {:>8} {:>10}",
                record.id.as_str(),
                record.status.as_str(),
                last,
                counts.contacts,
                counts.chats,
                counts.messages
            )?;
        }
        Ok(())
    }

    async fn handle_auth(ctx: &CliContext, out: &mut dyn Write, session: &SessionId) -> Result<()> {
        let store = ctx.auth_store(session);
        let creds = store.load_creds().await?;
        let fragments: Vec<String> = ctx
            .storage
            .list_auth_fragments(session)?
            .into_iter()
            .filter_map(|record| record.key_id)
            .collect();

        if ctx.json {
            let body = json!({
                "session": session,
                "creds": encode_map(&creds),
                "fragments": fragments,
            });
            serde_json::to_writer_pretty(&mut *out, &body)?;
            writeln!(out)?;
            return Ok(());
        }

        if creds.is_empty() {
            writeln!(out, "No credentials stored for {session}")?;
            return Ok(());
        }
        for (field, value) in creds.fields() {
            let (kind, preview) = preview(value);
            let marker = if fragments.contains(field) { " [fragment]" } else { "" };
            writeln!(out, "{field:<28} {kind:<10} {preview}{marker}")?;
        }
        Ok(())
    }

    fn handle_history(
        ctx: &CliContext,
        out: &mut dyn Write,
        session: &SessionId,
        chat: Option<&str>,
        limit: usize,
    ) -> Result<()> {
        let counts = ctx.storage.history_counts(session)?;
        let messages = ctx.storage.list_messages(session, chat, limit)?;

        if ctx.json {
            let body = json!({ "counts": counts, "messages": messages });
            serde_json::to_writer_pretty(&mut *out, &body)?;
            writeln!(out)?;
            return Ok(());
        }

        writeln!(
            out,
            "{session}: {} contacts, {} chats, {} messages",
            counts.contacts, counts.chats, counts.messages
        )?;
        for message in &messages {
            let time = message
                .timestamp
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            let direction = if message.from_me { "->" } else { "<-" };
            let text = message
                .content
                .text_content
                .as_deref()
                .map(|text| truncate(text, PREVIEW_CHARS))
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                out,
                "{time:<19} {direction} {:<28} {:<24} {text}",
                message.remote_id,
                message.content.message_type.as_str()
            )?;
        }
        Ok(())
    }

    async fn handle_import(
        ctx: &CliContext,
        out: &mut dyn Write,
        session: &SessionId,
        file: &Path,
    ) -> Result<()> {
        let batches = read_batches(file)?;
        if ctx.storage.get_session(session)?.is_none() {
            ctx.storage.upsert_session(&SessionRecord::new(session.clone()))?;
            info!(session = %session, "registered session for import");
        }

        let ingestor = HistoryIngestor::new(ctx.storage.clone(), ctx.config.history.chunk_size);
        let mut total = IngestReport::default();
        for batch in batches {
            let report = ingestor.ingest(session, batch).await;
            total.contacts += report.contacts;
            total.chats += report.chats;
            total.messages += report.messages;
            total.skipped_messages += report.skipped_messages;
            total.failed_chunks += report.failed_chunks;
            total.completed |= report.completed;
        }
        if total.failed_chunks > 0 {
            warn!(session = %session, failed_chunks = total.failed_chunks, "import had failures");
        }

        if ctx.json {
            serde_json::to_writer_pretty(&mut *out, &total)?;
            writeln!(out)?;
        } else {
            writeln!(
                out,
                "Imported {} contacts, {} chats, {} new messages ({} skipped, {} failed chunks)",
                total.contacts,
                total.chats,
                total.messages,
                total.skipped_messages,
                total.failed_chunks
            )?;
        }
        Ok(())
    }

    async fn handle_purge(
        ctx: &CliContext,
        out: &mut dyn Write,
        session: &SessionId,
        confirmed: bool,
    ) -> Result<()> {
        if !confirmed {
            let counts = ctx.storage.history_counts(session)?;
            writeln!(
                out,
                "Would delete {session}: auth state, {} contacts, {} chats, {} messages",
                counts.contacts, counts.chats, counts.messages
            )?;
            return Err(CliError::PurgeNotConfirmed(session.to_string()));
        }

        ctx.auth_store(session).clear().await?;
        ctx.storage.purge_session(session)?;
        info!(session = %session, "session purged");
        writeln!(out, "Purged {session}")?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn parse_session(raw: &str) -> Result<SessionId> {
    SessionId::new(raw).map_err(|err| CliError::InvalidSession(err.to_string()))
}

/// Accept a single batch object or an array of batches
fn read_batches(file: &Path) -> Result<Vec<HistoryBatch>> {
    let contents = std::fs::read_to_string(file)?;
    let value: Value = serde_json::from_str(&contents)?;
    let batches = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<HistoryBatch>, _>>(),
        other => serde_json::from_value(other).map(|batch| vec![batch]),
    };
    batches.map_err(|err| CliError::InvalidImport(err.to_string()))
}

/// Kind label and short rendering of a credential value
pub fn preview(value: &AuthValue) -> (&'static str, String) {
    match value {
        AuthValue::Null => ("null", "null".to_string()),
        AuthValue::Bool(b) => ("bool", b.to_string()),
        AuthValue::Number(n) => ("number", n.to_string()),
        AuthValue::String(s) => ("string", truncate(s, PREVIEW_CHARS)),
        AuthValue::Bytes(bytes) => {
            let shown = &bytes[..bytes.len().min(PREVIEW_BYTES)];
            let ellipsis = if bytes.len() > PREVIEW_BYTES { ".." } else { "" };
            (
                "bytes",
                format!("{}{} ({} bytes)", hex::encode(shown), ellipsis, bytes.len()),
            )
        }
        AuthValue::Array(items) => ("array", format!("[{} items]", items.len())),
        AuthValue::Object(map) => ("object", format!("{{{} fields}}", map.len())),
        AuthValue::Structured(inner) => ("structured", inner.type_name().to_string()),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}..")
    } else {
        head
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
