//! OS signal handling.
//!
//! # Responsibilities
//! - SIGTERM/SIGINT trigger graceful shutdown; a second one exits
//! - SIGHUP reloads the config file and hands it to the server
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A config that fails to load on SIGHUP is logged and ignored

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::config::schema::InspectConfig;
use crate::config::watcher::reload_into;
use crate::lifecycle::shutdown::Shutdown;

/// Handle signals until the process exits.
#[cfg(unix)]
pub async fn listen(
    shutdown: Shutdown,
    config_path: PathBuf,
    reload_tx: mpsc::UnboundedSender<InspectConfig>,
) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut hup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                on_stop(&shutdown, "SIGINT");
            }
            _ = term.recv() => on_stop(&shutdown, "SIGTERM"),
            _ = hup.recv() => {
                tracing::info!(path = %config_path.display(), "SIGHUP received, reloading config");
                reload_into(&config_path, &reload_tx);
            }
        }
    }
}

/// Handle signals until the process exits.
#[cfg(not(unix))]
pub async fn listen(
    shutdown: Shutdown,
    _config_path: PathBuf,
    _reload_tx: mpsc::UnboundedSender<InspectConfig>,
) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        on_stop(&shutdown, "Ctrl+C");
    }
}

fn on_stop(shutdown: &Shutdown, signal: &str) {
    if shutdown.trigger() {
        tracing::info!(signal, "Shutdown requested");
    } else {
        tracing::warn!(signal, "Second shutdown request, exiting now");
        std::process::exit(130);
    }
}
