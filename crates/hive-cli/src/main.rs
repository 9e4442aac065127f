//! Hive CLI - operator entry point

use std::io::Write;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hive_cli::{
    config::{load_configuration, open_storage},
    Cli, CliContext, CommandDispatcher,
};
use hive_core::LoggingConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration before logging so the configured level applies
    let loaded = load_configuration(&cli).context("failed to load configuration")?;
    setup_logging(&loaded.config.logging, cli.verbose);
    match &loaded.source {
        Some(path) => info!(path = %path.display(), "loaded configuration"),
        None => debug!("no configuration file, using defaults"),
    }
    let config = loaded.config;
    debug!(?config, "effective configuration");

    let storage = open_storage(&config).context("failed to open storage")?;
    let ctx = CliContext::new(config, storage, cli.json);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    CommandDispatcher::execute(cli.command, &ctx, &mut out).await?;
    out.flush()?;
    Ok(())
}

/// Setup logging on stderr; `RUST_LOG` takes precedence over the config
fn setup_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
