//! Startup orchestration.
//!
//! # Responsibilities
//! - Install the metrics exporter when enabled
//! - Resolve every scope's rules (`--check` stops here)
//! - Bind listeners and hand back a ready server
//!
//! # Design Decisions
//! - Fail fast: a rule that cannot be resolved is fatal
//! - A metrics exporter that cannot start is not

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::schema::{InspectConfig, ObservabilityConfig};
use crate::inspect::loader::ModuleLoader;
use crate::observability::metrics::init_metrics;
use crate::proxy::scope::{build_registries, ScopeSummary, ServerError};
use crate::proxy::server::InspectServer;

/// Resolve every scope without binding anything.
pub fn check(config: &InspectConfig, loader: &dyn ModuleLoader) -> Result<Vec<ScopeSummary>, ServerError> {
    let registries = build_registries(config, loader)?;
    Ok(config
        .servers
        .iter()
        .filter_map(|server| {
            registries
                .get(&server.name)
                .map(|registry| ScopeSummary::new(server, registry))
        })
        .collect())
}

pub fn start_metrics(config: &ObservabilityConfig) {
    if !config.metrics_enabled {
        return;
    }

    match config.metrics_address.parse::<SocketAddr>() {
        Ok(addr) => {
            if let Err(e) = init_metrics(addr) {
                tracing::error!(address = %addr, error = %e, "Failed to start metrics exporter");
            }
        }
        Err(_) => tracing::error!(
            metrics_address = %config.metrics_address,
            "Failed to parse metrics address"
        ),
    }
}

/// Metrics first, then registries and listeners.
pub async fn start(config: InspectConfig, loader: Arc<dyn ModuleLoader>) -> Result<InspectServer, ServerError> {
    start_metrics(&config.observability);

    tracing::info!(
        servers = config.servers.len(),
        inherited_rules = config.modules.len(),
        "Configuration loaded"
    );

    InspectServer::bind(config, loader).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;
    use crate::config::schema::ProtocolConfig;
    use crate::inspect::loader::BuiltinLoader;

    #[test]
    fn check_reports_every_scope() {
        let config = parse_config(
            r#"
            [[modules]]
            name = "dump"
            library = "builtin"
            state = "off"

            [[servers]]
            name = "dns"
            listen = "127.0.0.1:5353"
            upstream = "127.0.0.1:53"
            protocol = "udp"
            "#,
        )
        .unwrap();

        let summaries = check(&config, &BuiltinLoader::with_builtins()).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].protocol, ProtocolConfig::Udp);
        assert_eq!(summaries[0].modules.len(), 1);
        assert!(!summaries[0].modules[0].enabled);

        let json = serde_json::to_value(&summaries).unwrap();
        assert_eq!(json[0]["protocol"], "udp");
        assert_eq!(json[0]["modules"][0]["library"], "builtin");
    }

    #[test]
    fn check_rejects_unknown_module() {
        let config = parse_config(
            r#"
            [[servers]]
            name = "web"
            listen = "127.0.0.1:8443"
            upstream = "127.0.0.1:443"
            modules = [{ directive = "waf builtin on" }]
            "#,
        )
        .unwrap();

        assert!(check(&config, &BuiltinLoader::with_builtins()).is_err());
    }
}
