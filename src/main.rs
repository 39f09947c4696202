//! stream-inspect
//!
//! A TCP/UDP proxy that hands every forwarded chunk to inspection modules.
//!
//! # Architecture Overview
//!
//! ```text
//!   client ──▶ ┌──────────┐   chunk   ┌────────────┐   chunk   ┌──────────┐ ──▶ upstream
//!              │ listener │ ────────▶ │  dispatch  │ ────────▶ │  pump    │
//!   client ◀── └──────────┘           └─────┬──────┘           └──────────┘ ◀── upstream
//!                                           │ TransferRecord
//!                                           ▼
//!                               ┌──────────────────────┐
//!                               │ module registry      │
//!                               │  dump → ids → ...    │
//!                               └──────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use stream_inspect::config::loader::load_config;
use stream_inspect::config::watcher::ConfigWatcher;
#[cfg(target_os = "linux")]
use stream_inspect::inspect::dylib::DylibLoader;
use stream_inspect::inspect::loader::{BuiltinLoader, ModuleLoader};
use stream_inspect::lifecycle::{signals, startup, Shutdown};
use stream_inspect::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "stream-inspect", version)]
#[command(about = "TCP/UDP proxy with pluggable packet inspection", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "stream-inspect.toml")]
    config: PathBuf,

    /// Resolve every module, print the registries as JSON and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    init_logging(&config.observability.log_level);

    #[cfg(target_os = "linux")]
    let loader = Arc::new(DylibLoader::new(BuiltinLoader::with_builtins()));
    #[cfg(not(target_os = "linux"))]
    let loader = Arc::new(BuiltinLoader::with_builtins());

    if cli.check {
        let summaries = startup::check(&config, loader.as_ref())?;
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    tracing::info!(config = %cli.config.display(), "stream-inspect v{} starting", env!("CARGO_PKG_VERSION"));

    let (watcher, config_updates) = ConfigWatcher::new(&cli.config);
    let reload_tx = watcher.sender();
    let _watcher = match watcher.run() {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, reload on SIGHUP only");
            None
        }
    };

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    {
        let shutdown = shutdown.clone();
        let path = cli.config.clone();
        tokio::spawn(async move {
            if let Err(e) = signals::listen(shutdown, path, reload_tx).await {
                tracing::error!(error = %e, "Signal handling failed");
            }
        });
    }

    let server = startup::start(config, Arc::clone(&loader) as Arc<dyn ModuleLoader>).await?;
    let result = server.run(config_updates, shutdown_rx).await;

    loader.close_all();
    tracing::info!("Shutdown complete");
    result.map_err(Into::into)
}
