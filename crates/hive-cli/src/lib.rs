//! Hive CLI library
//!
//! Offline maintenance of persisted session state: listing sessions,
//! inspecting reconciled credentials, querying and importing history, and
//! purging sessions.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::{CliContext, CommandDispatcher};
pub use error::{CliError, Result};
