//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path, overriding the configuration
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List persisted sessions with their last known status
    Sessions,
    /// Show the reconciled credentials of a session
    Auth {
        /// Session id
        session: String,
    },
    /// Show stored history of a session
    History {
        /// Session id
        session: String,
        /// Restrict messages to one chat
        #[arg(long)]
        chat: Option<String>,
        /// Number of newest messages to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Import a backfill dump (one batch or an array of batches)
    ImportHistory {
        /// Session id
        session: String,
        /// JSON file to import
        file: PathBuf,
    },
    /// Delete every record of a session
    Purge {
        /// Session id
        session: String,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Print the effective configuration
    Config,
}
