//! Restaurant Dashboard - order synchronizer and admin CLI
//!
//! Keeps a restaurant admin's view of incoming orders in step with the
//! backend (polling or STOMP push), raises a toast for every new order and
//! status change, and exposes the explicit order transitions as commands.

pub mod api;
pub mod auth;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod notifications;
pub mod orders;
pub mod storage;
pub mod sync;

use anyhow::Context;
use tracing::{debug, info};

use crate::commands::{AppContext, Command};
use crate::config::AppConfig;

/// Parse the process arguments, run one command, and return its outcome.
pub fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    // Keep the guard alive until exit; dropping it flushes the log file.
    let _log_guard = diagnostics::init_logging(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args).map_err(anyhow::Error::msg)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.api_base_url,
        transport = config.transport.as_str(),
        "Starting Restaurant Dashboard"
    );
    debug!(command = ?redacted(&command), "dispatching command");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let ctx = AppContext::new(config);
    runtime
        .block_on(commands::dispatch(&ctx, command))
        .map_err(anyhow::Error::msg)
}

/// The command with any password masked, for logging.
fn redacted(command: &Command) -> Command {
    match command {
        Command::Login { username, .. } => Command::Login {
            username: username.clone(),
            password: "[REDACTED]".to_string(),
        },
        other => other.clone(),
    }
}
