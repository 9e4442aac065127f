//! Configuration loading and storage selection for the CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use hive_core::{HiveConfig, MemoryStorage, SqliteStorage, Storage, StorageBackend};

use crate::cli::Cli;
use crate::error::Result;

/// File name looked up in the user's config directory
const CONFIG_FILE: &str = "config.toml";

/// Default config path: `<config dir>/hive/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("hive").join(CONFIG_FILE))
}

/// Effective configuration and the file it was read from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: HiveConfig,
    pub source: Option<PathBuf>,
}

/// Resolve configuration: explicit file, then the default path, then defaults
///
/// Environment overrides apply on top, and `--db` wins over everything.
/// Runs before logging is set up, so nothing here logs.
pub fn load_configuration(cli: &Cli) -> Result<LoadedConfig> {
    let source = resolve_path(cli.config.as_deref());
    let mut config = match &source {
        Some(path) => HiveConfig::load_from_file(path)?,
        None => HiveConfig::default(),
    };

    config.apply_env_overrides()?;
    if let Some(db) = &cli.db {
        config.storage.backend = StorageBackend::Sqlite;
        config.storage.db_path = db.clone();
    }
    config.validate()?;
    Ok(LoadedConfig { config, source })
}

fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    default_config_path().filter(|path| path.exists())
}

/// Open the configured storage backend
pub fn open_storage(config: &HiveConfig) -> Result<Arc<dyn Storage>> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            info!(path = %config.storage.db_path.display(), "opening sqlite storage");
            Ok(Arc::new(SqliteStorage::open(&config.storage.db_path)?))
        }
        StorageBackend::Memory => {
            warn!("memory storage selected, nothing will persist");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("hive").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_explicit_file_is_reported_as_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(&path, "[history]\nchunk_size = 7\n").unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "config"]);
        let loaded = load_configuration(&cli).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.history.chunk_size, 7);
    }

    #[test]
    fn test_db_flag_selects_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(&path, "[storage]\nbackend = \"memory\"\n").unwrap();
        let db = dir.path().join("state.db");

        let cli = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--db",
            db.to_str().unwrap(),
            "sessions",
        ]);
        let loaded = load_configuration(&cli).unwrap();
        assert_eq!(loaded.config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(loaded.config.storage.db_path, db);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let cli = parse(&["--config", path.to_str().unwrap(), "config"]);
        assert!(load_configuration(&cli).is_err());
    }
}
