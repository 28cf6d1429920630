//! # topicwatch
//!
//! Runs one status poll: connects to the game server console, collects the
//! player count and in-game time, and writes them to a Discord channel topic.
//! Intended to be invoked periodically by an external scheduler.
//!
//! Pass `--past-due` when the scheduler fired late.

use std::process::ExitCode;

use topicwatch::config::AppConfig;
use topicwatch::job::{self, Invocation};
use topicwatch::session::SessionOutcome;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let past_due = std::env::args().any(|arg| arg == "--past-due");

    let config = AppConfig::from_env();
    let verbose = config.as_ref().map(|c| c.verbose).unwrap_or(false);

    // Initialize logging; `log` records from the library are bridged in.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "info" })
            }),
        )
        .init();

    let config = config.map_err(|e| {
        log::error!("Configuration error: {}", e);
        e
    })?;

    let outcome = job::run_once(&config, Invocation { past_due }).await;
    Ok(match outcome {
        SessionOutcome::Failure(_) => ExitCode::FAILURE,
        SessionOutcome::Success(_) | SessionOutcome::Timeout | SessionOutcome::Disconnected => {
            ExitCode::SUCCESS
        }
    })
}
