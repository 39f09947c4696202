//! Proxy host runtime.
//!
//! # Data Flow
//! ```text
//! client ──▶ listener ──▶ session ──▶ inspect(Downstream) ──▶ upstream
//! client ◀── inspect(FromUpstream) ◀── session ◀────────────── upstream
//! ```
//!
//! # Design Decisions
//! - Each chunk is inspected before it is forwarded; results never alter
//!   or block the data
//! - A session's endpoints are always those of the client-facing socket
//! - Modules run inline on the pump task

pub mod scope;
pub mod server;
pub mod tcp;
pub mod udp;

pub use scope::{Scope, ScopeSummary, ServerError};
pub use server::InspectServer;
