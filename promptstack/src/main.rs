//! promptstack: AI suggestions for prose, reviewed and applied as diffs.
//!
//! Entry point for the `promptstack` binary.
//!
//! # Startup sequence
//!
//! 1. Parse the command line and install the `tracing` subscriber (stderr,
//!    filtered by `PROMPTSTACK_LOG`).
//! 2. Load the config: `--config` must parse; the XDG default may be missing
//!    or broken and falls back to defaults.
//! 3. `register_shutdown()`: SIGTERM and SIGINT set a flag polled below.
//! 4. Run the command future next to a 50 ms heartbeat that turns the flag
//!    into a cancellation of the command.

mod cli;
mod commands;
mod event;
mod library;
mod render;
mod signals;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use promptstack_core::config::config_path;
use promptstack_core::PipelineConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("PROMPTSTACK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match explicit {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(PipelineConfig::load_or_default(&config_path())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    init_tracing();
    let config = load_config(cli.config.as_deref())?;
    let shutdown = signals::register_shutdown().context("installing signal handlers")?;
    let cancel = CancellationToken::new();

    let work = commands::run(cli.command, config, cancel.clone());
    tokio::pin!(work);
    loop {
        tokio::select! {
            // The flag is only visible by polling; the heartbeat bounds the latency.
            _ = tokio::time::sleep(Duration::from_millis(50)), if !cancel.is_cancelled() => {
                if shutdown.load(Ordering::Relaxed) {
                    tracing::info!("shutdown requested");
                    cancel.cancel();
                }
            }
            result = &mut work => return result,
        }
    }
}
