//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Build registries → Metrics → Bind scopes
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain sessions → Close modules
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Reload config from disk
//! ```
//!
//! # Design Decisions
//! - Fail fast: a scope whose rules cannot be resolved stops startup
//! - Shutdown has a grace period, then remaining sessions are abandoned
//! - A second SIGTERM/SIGINT exits immediately

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
