//! Hive Runtime
//!
//! This crate drives many protocol sessions at once:
//! - `ConnectionSupervisor`: owns the live session registry, serializes each
//!   session's lifecycle and reconnects dropped sessions
//! - `AuthStateStore`: per-session credential persistence with fragment
//!   reconciliation and the signal keyspace
//! - `HistoryIngestor`: chunked, idempotent backfill persistence
//!
//! `hive-core` provides the value model, engine boundary and storage backends
//! this crate builds on.

pub mod auth_store;
pub mod history;
pub mod supervisor;

pub use auth_store::AuthStateStore;
pub use history::{HistoryIngestor, HistorySyncProgress, IngestReport};
pub use supervisor::{ConnectionSupervisor, SessionSummary};

// Re-export core types for convenience
pub use hive_core::{
    EngineEvent, HiveConfig, HiveError, HiveResult, ProtocolEngine, SessionId, SessionStatus,
    Storage,
};
