//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatch engine, proxy sessions, config reloads
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout log lines
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Module names and scopes are log fields, never interpolated text
//! - Per-chunk module failures are visible here and nowhere else

pub mod logging;
pub mod metrics;
