//! prayerline command-line entry point.
//!
//! Results are written to stdout as JSON; logging goes to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use prayerline_client::Session;
use prayerline_core::{AppConfig, LocalBus};
use tracing_subscriber::EnvFilter;

mod args;
mod commands;

use args::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().context("loading configuration")?;
    if let Some(base_url) = cli.base_url {
        config.api_base_url = base_url;
        config.validate()?;
    }
    if cli.command.is_write() {
        config.require_api_token()?;
    }

    let bus = LocalBus::new();
    let session = Session::connect(&config, &bus)?;
    tracing::debug!(base_url = %config.api_base_url, "session ready");

    let outcome = commands::run(&session, cli.command).await;
    session.shutdown().await;
    outcome
}

impl Command {
    fn is_write(&self) -> bool {
        !matches!(self, Command::Feed { .. } | Command::Avatar { .. })
    }
}
