//! telegate: a Telegram approval gateway for a LangGraph email assistant.
//!
//! The assistant triages email on its own and pauses whenever a step needs
//! human sign-off. This daemon watches for those paused threads, presents
//! each one in Telegram with approve/edit/respond buttons, and feeds the
//! decision back so the thread can resume.

mod bot;
mod client;
mod config;
mod error;
mod state;
mod utils;

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::bot::Bridge;
use crate::client::AgentClient;
use crate::state::StateStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "telegate", version, about = "Telegram approval gateway for a LangGraph email-triage agent")]
struct Cli {
    /// Configuration file (default: ~/.telegate/config.toml)
    #[arg(long, env = "TELEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// State file location (default: ~/.telegate/state.json)
    #[arg(long, env = "TELEGATE_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose)?;
    info!("telegate v{VERSION} starting");

    let mut settings = config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(path) = cli.state_file {
        settings.state_file = path;
    }
    settings.validate().context("invalid configuration")?;

    let store = Arc::new(StateStore::open(&settings.state_file));
    let client = AgentClient::new(&settings.agent_url, settings.api_key.clone())
        .context("building agent API client")?;
    if client.verify_connectivity().await {
        info!("Agent API reachable at {}", settings.agent_url);
    } else {
        warn!(
            "Agent API at {} is not responding, continuing anyway",
            settings.agent_url
        );
    }

    let bridge = Arc::new(Bridge::new(&settings, store, client));
    tokio::spawn(bot::poller::run(
        Arc::clone(&bridge),
        Duration::from_secs(settings.polling_interval_secs),
    ));
    bridge.run().await;
    Ok(())
}

/// Log to a daily-rotated file under `~/.telegate/logs/` and to stderr.
/// The returned guard flushes the file writer on drop.
fn init_tracing(verbosity: u8) -> anyhow::Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbosity {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });

    let log_dir = config::telegate_home().join("logs");
    std::fs::create_dir_all(&log_dir).context("creating log directory")?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "telegate.log"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file_writer.and(std::io::stderr))
        .with_ansi(false)
        .init();
    Ok(guard)
}
