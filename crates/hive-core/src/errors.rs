//! Error types for Hive
//!
//! This module contains all error types used throughout the Hive core,
//! including codec errors, storage errors, session errors, protocol engine
//! errors, and the main HiveError type that unifies them all.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised while reducing structured credential values
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("No canonical form available for {type_name}")]
    Unsupported { type_name: String },
    #[error("Canonical conversion failed: {reason}")]
    ConversionFailed { reason: String },
}

/// Storage backend error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage not available: {reason}")]
    NotAvailable { reason: String },
    #[error("Storage lock poisoned")]
    LockPoisoned,
    #[error("Record not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Record already exists: {entity} {id}")]
    AlreadyExists { entity: &'static str, id: String },
    #[error("Stored record is corrupt: {reason}")]
    Corrupt { reason: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Session lifecycle error types
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },
    #[error("Session {session_id} is not connected")]
    NotConnected { session_id: String },
    #[error("Session already exists: {session_id}")]
    AlreadyExists { session_id: String },
    #[error("Invalid session id: {reason}")]
    InvalidId { reason: String },
}

/// Protocol engine error types
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to open socket for {session_id}: {reason}")]
    OpenFailed { session_id: String, reason: String },
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
    #[error("Socket is closed")]
    Closed,
    #[error("Operation not supported by engine: {operation}")]
    Unsupported { operation: String },
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for Hive
#[derive(Debug, thiserror::Error)]
pub enum HiveError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl HiveError {
    /// Create a session not found error
    pub fn session_not_found<S: Into<String>>(session_id: S) -> Self {
        HiveError::Session(SessionError::NotFound {
            session_id: session_id.into(),
        })
    }

    /// Create a session not connected error
    pub fn not_connected<S: Into<String>>(session_id: S) -> Self {
        HiveError::Session(SessionError::NotConnected {
            session_id: session_id.into(),
        })
    }

    /// Create a session already exists error
    pub fn session_exists<S: Into<String>>(session_id: S) -> Self {
        HiveError::Session(SessionError::AlreadyExists {
            session_id: session_id.into(),
        })
    }

    /// Create an engine open failure
    pub fn open_failed<S: Into<String>, R: Into<String>>(session_id: S, reason: R) -> Self {
        HiveError::Engine(EngineError::OpenFailed {
            session_id: session_id.into(),
            reason: reason.into(),
        })
    }

    /// Create a generic storage backend error
    pub fn storage<T: Into<String>>(message: T) -> Self {
        HiveError::Storage(StorageError::Backend(message.into()))
    }

    /// Create a configuration validation error
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        HiveError::Config(ConfigError::Invalid {
            reason: reason.into(),
        })
    }

    /// Whether this error means the session has no live socket
    pub fn is_not_connected(&self) -> bool {
        matches!(self, HiveError::Session(SessionError::NotConnected { .. }))
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, HiveError>;
pub type HiveResult<T> = Result<T>;
pub type StorageResult<T> = core::result::Result<T, StorageError>;
