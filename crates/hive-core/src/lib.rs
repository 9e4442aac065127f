//! Hive Core
//!
//! This crate provides the foundational types for supervising many long-lived
//! messaging protocol sessions: the credential value model and its storage
//! codec, the wire model and message normalizer, the protocol engine boundary
//! and the storage interface with its in-memory and SQLite backends.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod auth;
pub mod codec;
pub mod config;
pub mod engine;
pub mod errors;
pub mod message;
pub mod storage;
pub mod types;
pub mod wire;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use auth::{
    signal_key, AuthCredentials, AuthState, AuthValue, SignalKeyDelta, SignalKeyStore,
    SignalKeys, StructuredValue,
};
pub use config::{
    AuthConfig, HiveConfig, HistoryConfig, LoggingConfig, StorageBackend, StorageConfig,
    SupervisorConfig,
};
pub use engine::{
    ChatModification, ConnectionPhase, ConnectionUpdate, DisconnectInfo, DisconnectReason,
    EngineConnection, EngineEvent, OutgoingMessage, ProtocolEngine, ProtocolSocket,
};
pub use errors::{
    CodecError, ConfigError, EngineError, HiveError, HiveResult, Result, SessionError,
    StorageError, StorageResult,
};
pub use message::{normalize, normalize_wire, MediaRef, MessagePayload, MessageType, NormalizedMessage};
pub use storage::{
    AuthStateRecord, ChatRecord, ContactRecord, HistoryCounts, MemoryStorage, MessageRecord,
    SessionRecord, Storage,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use types::{SessionId, SessionStatus};
pub use wire::{HistoryBatch, MessageKey, UpsertKind, WireChat, WireContact, WireMessage};
