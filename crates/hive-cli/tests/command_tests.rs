//! Integration tests for CLI command handlers against a SQLite file

use std::sync::Arc;

use serde_json::{json, Value};

use hive_cli::{CliContext, CliError, CommandDispatcher, Commands};
use hive_core::{
    AuthCredentials, AuthValue, HiveConfig, SessionId, SessionRecord, SessionStatus,
    SqliteStorage, Storage, StorageBackend,
};
use hive_runtime::AuthStateStore;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

struct Fixture {
    _dir: tempfile::TempDir,
    ctx: CliContext,
}

fn fixture(json_output: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = HiveConfig::default();
    config.storage.backend = StorageBackend::Sqlite;
    config.storage.db_path = dir.path().join("hive.db");
    config.history.chunk_size = 2;

    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&config.storage.db_path).unwrap());
    Fixture {
        _dir: dir,
        ctx: CliContext::new(config, storage, json_output),
    }
}

fn sid(name: &str) -> SessionId {
    SessionId::new(name).unwrap()
}

async fn run(ctx: &CliContext, command: Commands) -> (Result<(), CliError>, String) {
    let mut out = Vec::new();
    let result = CommandDispatcher::execute(command, ctx, &mut out).await;
    (result, String::from_utf8(out).unwrap())
}

fn backfill() -> Value {
    json!([
        {
            "contacts": [{"id": "1@s.whatsapp.net", "name": "Ana"}],
            "chats": [{"id": "1@s.whatsapp.net", "unreadCount": 2}],
            "messages": [
                {
                    "key": {"remoteJid": "1@s.whatsapp.net", "fromMe": false, "id": "A1"},
                    "message": {"conversation": "first"},
                    "messageTimestamp": 1700000000
                },
                {
                    "key": {"remoteJid": "1@s.whatsapp.net", "fromMe": true, "id": "A2"},
                    "message": {"extendedTextMessage": {"text": "second"}},
                    "messageTimestamp": {"low": 1700000100, "high": 0}
                },
                {"key": {"remoteJid": "1@s.whatsapp.net"}}
            ]
        },
        {
            "messages": [
                {
                    "key": {"remoteJid": "2@s.whatsapp.net", "id": "B1"},
                    "message": {"imageMessage": {"caption": "pic", "mimetype": "image/jpeg"}},
                    "messageTimestamp": "1700000200"
                }
            ],
            "isLatest": true
        }
    ])
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_import_then_history() {
    let f = fixture(false);
    let file = f._dir.path().join("backfill.json");
    std::fs::write(&file, backfill().to_string()).unwrap();

    let (result, output) = run(
        &f.ctx,
        Commands::ImportHistory {
            session: "alpha".to_string(),
            file: file.clone(),
        },
    )
    .await;
    result.unwrap();
    assert!(output.contains("3 new messages"), "{output}");
    assert!(output.contains("1 skipped"), "{output}");

    // Replaying the dump inserts nothing new
    let (result, output) = run(
        &f.ctx,
        Commands::ImportHistory {
            session: "alpha".to_string(),
            file,
        },
    )
    .await;
    result.unwrap();
    assert!(output.contains("0 new messages"), "{output}");

    let (result, output) = run(
        &f.ctx,
        Commands::History {
            session: "alpha".to_string(),
            chat: Some("1@s.whatsapp.net".to_string()),
            limit: 10,
        },
    )
    .await;
    result.unwrap();
    assert!(output.starts_with("alpha: 1 contacts, 1 chats, 3 messages"), "{output}");
    let lines: Vec<&str> = output.lines().skip(1).collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("second"));
    assert!(lines[1].contains("first"));

    let status = f.ctx.storage.get_session(&sid("alpha")).unwrap().unwrap().status;
    assert_eq!(status, SessionStatus::Close);
}

#[tokio::test]
async fn test_sessions_json_lists_counts() {
    let f = fixture(true);
    f.ctx
        .storage
        .upsert_session(&SessionRecord {
            status: SessionStatus::Open,
            ..SessionRecord::new(sid("beta"))
        })
        .unwrap();

    let (result, output) = run(&f.ctx, Commands::Sessions).await;
    result.unwrap();
    let rows: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(rows[0]["session"]["id"], "beta");
    assert_eq!(rows[0]["session"]["status"], "open");
    assert_eq!(rows[0]["history"]["messages"], 0);
}

#[tokio::test]
async fn test_auth_shows_reconciled_fields() {
    let f = fixture(false);
    let store = AuthStateStore::new(
        sid("alpha"),
        f.ctx.storage.clone(),
        f.ctx.config.auth.fragment_keys.clone(),
    );
    let mut creds = AuthCredentials::new();
    creds.insert("noiseKey", AuthValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef]));
    creds.insert("registrationId", 4242i64);
    store.save_creds(creds).await.unwrap();

    let (result, output) = run(
        &f.ctx,
        Commands::Auth {
            session: "alpha".to_string(),
        },
    )
    .await;
    result.unwrap();

    let noise = output.lines().find(|line| line.starts_with("noiseKey")).unwrap();
    assert!(noise.contains("deadbeef (4 bytes)"));
    assert!(noise.ends_with("[fragment]"));
    let registration = output
        .lines()
        .find(|line| line.starts_with("registrationId"))
        .unwrap();
    assert!(registration.contains("4242"));
    assert!(!registration.contains("[fragment]"));
}

#[tokio::test]
async fn test_purge_requires_confirmation() {
    let f = fixture(false);
    f.ctx
        .storage
        .upsert_session(&SessionRecord::new(sid("alpha")))
        .unwrap();

    let (result, output) = run(
        &f.ctx,
        Commands::Purge {
            session: "alpha".to_string(),
            yes: false,
        },
    )
    .await;
    assert!(matches!(result, Err(CliError::PurgeNotConfirmed(_))));
    assert!(output.starts_with("Would delete alpha"));
    assert!(f.ctx.storage.get_session(&sid("alpha")).unwrap().is_some());

    let (result, _) = run(
        &f.ctx,
        Commands::Purge {
            session: "alpha".to_string(),
            yes: true,
        },
    )
    .await;
    result.unwrap();
    assert!(f.ctx.storage.get_session(&sid("alpha")).unwrap().is_none());
}

#[tokio::test]
async fn test_import_rejects_non_batch_json() {
    let f = fixture(false);
    let file = f._dir.path().join("bad.json");
    std::fs::write(&file, r#"{"messages": "nope"}"#).unwrap();

    let (result, _) = run(
        &f.ctx,
        Commands::ImportHistory {
            session: "alpha".to_string(),
            file,
        },
    )
    .await;
    assert!(matches!(result, Err(CliError::InvalidImport(_))));
}
