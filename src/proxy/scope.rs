//! Server scopes: one proxied service with its live module registry.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::config::schema::{InspectConfig, ProtocolConfig, ServerConfig};
use crate::inspect::dispatch::{DispatchEngine, DispatchReport};
use crate::inspect::error::RegistryError;
use crate::inspect::loader::ModuleLoader;
use crate::inspect::registry::{BindingSummary, ModuleRegistry, RegistryCell, RuleDescriptor};
use crate::inspect::tuple::{extract, Direction};
use crate::net::connection::Session;

/// Errors while building or starting server scopes.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server `{scope}`: {source}")]
    Registry {
        scope: String,
        #[source]
        source: RegistryError,
    },

    #[error("server `{scope}`: invalid listen address `{value}`")]
    InvalidListen { scope: String, value: String },

    #[error("server `{scope}`: upstream `{value}` did not resolve")]
    InvalidUpstream { scope: String, value: String },

    #[error("server `{scope}`: failed to bind {addr}: {source}")]
    Bind {
        scope: String,
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// A proxied service and the registry its chunks are dispatched to.
#[derive(Debug)]
pub struct Scope {
    config: ServerConfig,
    engine: DispatchEngine,
    registry: RegistryCell,
}

impl Scope {
    pub fn new(config: ServerConfig, registry: ModuleRegistry) -> Self {
        Self {
            engine: DispatchEngine::new(config.name.as_str()),
            registry: RegistryCell::new(registry),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegistryCell {
        &self.registry
    }

    /// Whether chunks of `session` can be inspected at all.
    ///
    /// Logs once per session; the per-chunk skip is only a debug event.
    pub fn check_session(&self, session: &Session) -> bool {
        match extract(session, Direction::Downstream) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    scope = %self.config.name,
                    session = %session.id,
                    client = %session.remote,
                    error = %e,
                    "Session will not be inspected"
                );
                false
            }
        }
    }

    /// Run the current registry over one chunk.
    ///
    /// Returns `None` when the chunk could not be inspected; forwarding
    /// proceeds either way.
    pub fn inspect(&self, session: &Session, chunk: &[u8], direction: Direction) -> Option<DispatchReport> {
        let registry = self.registry.load();
        self.engine
            .dispatch(session, chunk, direction, &registry)
            .inspect_err(|_| {
                tracing::debug!(scope = %self.config.name, session = %session.id, "Chunk not inspected");
            })
            .ok()
    }
}

/// Build the registry of one server, applying scope inheritance.
pub fn build_registry(
    config: &InspectConfig,
    server: &ServerConfig,
    loader: &dyn ModuleLoader,
) -> Result<ModuleRegistry, ServerError> {
    let wrap = |source| ServerError::Registry {
        scope: server.name.clone(),
        source,
    };

    let rules = config
        .rules_for(server)
        .iter()
        .map(|r| r.to_descriptor())
        .collect::<Result<Vec<RuleDescriptor>, _>>()
        .map_err(wrap)?;

    ModuleRegistry::build(&rules, loader).map_err(wrap)
}

/// Build every server's registry. All or nothing.
pub fn build_registries(
    config: &InspectConfig,
    loader: &dyn ModuleLoader,
) -> Result<HashMap<String, ModuleRegistry>, ServerError> {
    config
        .servers
        .iter()
        .map(|server| Ok((server.name.clone(), build_registry(config, server, loader)?)))
        .collect()
}

/// Diagnostic view of one scope.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeSummary {
    pub name: String,
    pub listen: String,
    pub upstream: String,
    pub protocol: ProtocolConfig,
    pub modules: Vec<BindingSummary>,
}

impl ScopeSummary {
    pub fn new(server: &ServerConfig, registry: &ModuleRegistry) -> Self {
        Self {
            name: server.name.clone(),
            listen: server.listen.clone(),
            upstream: server.upstream.clone(),
            protocol: server.protocol,
            modules: registry.summary(),
        }
    }
}
