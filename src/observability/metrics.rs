//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Count inspected chunks and module outcomes
//! - Track proxied connections
//! - Expose a Prometheus-compatible endpoint when enabled
//!
//! # Metrics
//! - `inspect_chunks_total` (counter): chunks walked, by protocol, direction
//! - `inspect_module_status_total` (counter): module outcomes, by module, status
//! - `inspect_extraction_failures_total` (counter): chunks skipped by extraction
//! - `inspect_active_connections` (gauge): open proxied sessions, by protocol
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::inspect::record::StatusCode;
use crate::inspect::tuple::{Direction, Protocol};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_chunk(protocol: Protocol, direction: Direction) {
    counter!(
        "inspect_chunks_total",
        "protocol" => protocol.as_str(),
        "direction" => direction.as_str()
    )
    .increment(1);
}

pub fn record_module_status(module: &str, status: StatusCode) {
    counter!(
        "inspect_module_status_total",
        "module" => module.to_string(),
        "status" => status.as_str()
    )
    .increment(1);
}

pub fn record_extraction_failure() {
    counter!("inspect_extraction_failures_total").increment(1);
}

pub fn record_connection_opened(protocol: Protocol) {
    gauge!("inspect_active_connections", "protocol" => protocol.as_str()).increment(1.0);
}

pub fn record_connection_closed(protocol: Protocol) {
    gauge!("inspect_active_connections", "protocol" => protocol.as_str()).decrement(1.0);
}
