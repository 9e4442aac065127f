//! Centralized Configuration Management
//!
//! All tunables of the supervisor, auth store, history ingestor, storage and
//! logging in one serde tree, loadable from TOML with environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Credential fields persisted as standalone fragment records by default
pub const DEFAULT_FRAGMENT_KEYS: &[&str] = &[
    "noiseKey",
    "pairingEphemeralKeyPair",
    "signedIdentityKey",
    "signedPreKey",
    "advSecretKey",
];

/// Environment override for `storage.db_path`
pub const ENV_DB_PATH: &str = "HIVE_DB_PATH";
/// Environment override for `logging.level`
pub const ENV_LOG_LEVEL: &str = "HIVE_LOG_LEVEL";
/// Environment override for `supervisor.reconnect_delay_ms`
pub const ENV_RECONNECT_DELAY_MS: &str = "HIVE_RECONNECT_DELAY_MS";

// ----------------------------------------------------------------------------
// Supervisor Configuration
// ----------------------------------------------------------------------------

/// Connection supervision policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Fixed delay before reconnecting a dropped session
    pub reconnect_delay_ms: u64,
    /// Connect every persisted session with credentials at startup
    pub resume_on_start: bool,
    /// Clear stored auth state after a logged-out disconnect
    pub purge_auth_on_logout: bool,
    /// Persist live `messages.upsert` deliveries
    pub store_live_messages: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5_000,
            resume_on_start: true,
            purge_auth_on_logout: true,
            store_live_messages: true,
        }
    }
}

impl SupervisorConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            reconnect_delay_ms: 100,
            resume_on_start: false,
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Auth Configuration
// ----------------------------------------------------------------------------

/// Auth state store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Credential fields stored as individual fragment records
    pub fragment_keys: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            fragment_keys: DEFAULT_FRAGMENT_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

// ----------------------------------------------------------------------------
// History Configuration
// ----------------------------------------------------------------------------

/// Backfill ingestion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Rows per storage transaction
    pub chunk_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { chunk_size: 500 }
    }
}

// ----------------------------------------------------------------------------
// Storage Configuration
// ----------------------------------------------------------------------------

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite database file
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            db_path: PathBuf::from("hive.db"),
        }
    }
}

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ----------------------------------------------------------------------------
// Complete Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for Hive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    pub supervisor: SupervisorConfig,
    pub auth: AuthConfig,
    pub history: HistoryConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl HiveConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            supervisor: SupervisorConfig::testing(),
            history: HistoryConfig { chunk_size: 2 },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                ..StorageConfig::default()
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document; missing keys take defaults
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: HiveConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Apply `HIVE_*` environment overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level.to_lowercase();
        }
        if let Some(delay) = lookup(ENV_RECONNECT_DELAY_MS) {
            self.supervisor.reconnect_delay_ms =
                delay.trim().parse().map_err(|_| ConfigError::Invalid {
                    reason: format!("{} must be an integer, got {:?}", ENV_RECONNECT_DELAY_MS, delay),
                })?;
        }
        self.validate()
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supervisor.reconnect_delay_ms == 0 {
            return Err(invalid("supervisor.reconnect_delay_ms must be greater than 0"));
        }
        if self.history.chunk_size == 0 {
            return Err(invalid("history.chunk_size must be greater than 0"));
        }
        if self.auth.fragment_keys.iter().any(|key| key.trim().is_empty()) {
            return Err(invalid("auth.fragment_keys must not contain empty names"));
        }
        if self.storage.backend == StorageBackend::Sqlite
            && self.storage.db_path.as_os_str().is_empty()
        {
            return Err(invalid("storage.db_path must be set for the sqlite backend"));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(format!(
                "logging.level must be one of {:?}, got {:?}",
                LOG_LEVELS, self.logging.level
            )));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = HiveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.supervisor.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.auth.fragment_keys.len(), DEFAULT_FRAGMENT_KEYS.len());
        assert!(HiveConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = HiveConfig::from_toml_str(
            r#"
            [supervisor]
            reconnect_delay_ms = 250

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.supervisor.reconnect_delay_ms, 250);
        assert!(config.supervisor.purge_auth_on_logout);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.history.chunk_size, 500);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            HiveConfig::from_toml_str("[history]\nchunk_size = 0"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            HiveConfig::from_toml_str("[logging]\nlevel = \"loud\""),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            HiveConfig::from_toml_str("[supervisor\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            (ENV_DB_PATH, "/var/lib/hive/state.db"),
            (ENV_LOG_LEVEL, "DEBUG"),
            (ENV_RECONNECT_DELAY_MS, "1500"),
        ]
        .into_iter()
        .collect();

        let mut config = HiveConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.storage.db_path, PathBuf::from("/var/lib/hive/state.db"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.supervisor.reconnect_delay_ms, 1500);

        let mut config = HiveConfig::default();
        let result = config.apply_overrides(|name| {
            (name == ENV_RECONNECT_DELAY_MS).then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = HiveConfig::load_from_file("/nonexistent/hive.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
