//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → InspectConfig (validated, immutable)
//!     → proxy::server builds one ModuleRegistry per server scope
//!
//! On reload (file change or SIGHUP):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → every scope's registry rebuilt, then published atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - A server without rules inherits the top-level `modules` list
//! - Listener and upstream addresses are fixed at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::InspectConfig;
pub use schema::ProtocolConfig;
pub use schema::RuleConfig;
pub use schema::ServerConfig;
