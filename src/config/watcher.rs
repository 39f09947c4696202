//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::InspectConfig;

/// Monitors the configuration file and forwards every valid new version.
///
/// Invalid edits are logged and dropped; the running registries stay in place.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<InspectConfig>,
}

impl ConfigWatcher {
    /// Create a watcher and the receiver the server consumes updates from.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<InspectConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// A sender for reloads triggered elsewhere (SIGHUP).
    pub fn sender(&self) -> mpsc::UnboundedSender<InspectConfig> {
        self.update_tx.clone()
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = %path.display(), "Config file changed, reloading");
                    reload_into(&path, &tx);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}

/// Load `path` and forward it on success.
pub fn reload_into(path: &Path, tx: &mpsc::UnboundedSender<InspectConfig>) {
    match load_config(path) {
        Ok(config) => {
            let _ = tx.send(config);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
        }
    }
}
