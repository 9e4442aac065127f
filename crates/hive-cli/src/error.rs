//! Error handling for the Hive CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Hive error: {0}")]
    Hive(#[from] hive_core::HiveError),

    #[error("Configuration error: {0}")]
    Config(#[from] hive_core::ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] hive_core::StorageError),

    #[error("Invalid session id: {0}")]
    InvalidSession(String),

    #[error("Import file is not a history batch: {0}")]
    InvalidImport(String),

    #[error("Refusing to purge {0} without --yes")]
    PurgeNotConfirmed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
