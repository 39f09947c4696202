//! Inspection server: binds every configured scope and runs until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::config::schema::{InspectConfig, ProtocolConfig};
use crate::inspect::loader::ModuleLoader;
use crate::inspect::registry::ModuleRegistry;
use crate::net::connection::ConnectionTracker;
use crate::net::datagram::DatagramSocket;
use crate::net::listener::{Listener, ListenerError};
use crate::proxy::scope::{build_registries, Scope, ServerError};
use crate::proxy::{tcp, udp};

enum BoundSocket {
    Tcp(Listener),
    Udp {
        socket: DatagramSocket,
        upstream: SocketAddr,
    },
}

/// All proxied services of one process.
pub struct InspectServer {
    config: InspectConfig,
    loader: Arc<dyn ModuleLoader>,
    scopes: Vec<Arc<Scope>>,
    sockets: Vec<BoundSocket>,
    local_addrs: Vec<SocketAddr>,
    tracker: ConnectionTracker,
}

impl InspectServer {
    /// Build every registry, then bind every listen address.
    ///
    /// Fails before binding anything if a registry cannot be built. UDP
    /// upstreams are resolved here, once, so no lookup runs in a receive
    /// loop.
    pub async fn bind(config: InspectConfig, loader: Arc<dyn ModuleLoader>) -> Result<Self, ServerError> {
        let mut registries = build_registries(&config, loader.as_ref())?;

        let mut scopes = Vec::with_capacity(config.servers.len());
        let mut sockets = Vec::with_capacity(config.servers.len());
        let mut local_addrs = Vec::with_capacity(config.servers.len());

        for server in &config.servers {
            let addr = resolve_listen(&server.name, &server.listen).await?;
            let bind_err = |source| ServerError::Bind {
                scope: server.name.clone(),
                addr: server.listen.clone(),
                source,
            };

            let (socket, local) = match server.protocol {
                ProtocolConfig::Tcp => {
                    let listener = Listener::bind(addr, server.max_connections)
                        .await
                        .map_err(|e| match e {
                            ListenerError::Bind(source) => bind_err(source),
                            other => bind_err(std::io::Error::other(other.to_string())),
                        })?;
                    let local = listener.local_addr().map_err(bind_err)?;
                    (BoundSocket::Tcp(listener), local)
                }
                ProtocolConfig::Udp => {
                    let upstream = resolve_upstream(&server.name, &server.upstream).await?;
                    let socket = DatagramSocket::bind(addr).await.map_err(bind_err)?;
                    let local = socket.local_addr();
                    (BoundSocket::Udp { socket, upstream }, local)
                }
            };

            let registry = registries
                .remove(&server.name)
                .unwrap_or_else(ModuleRegistry::empty);
            tracing::info!(
                scope = %server.name,
                listen = %local,
                upstream = %server.upstream,
                protocol = ?server.protocol,
                modules = registry.len(),
                enabled = registry.enabled().count(),
                "Scope ready"
            );

            scopes.push(Arc::new(Scope::new(server.clone(), registry)));
            sockets.push(socket);
            local_addrs.push(local);
        }

        Ok(Self {
            config,
            loader,
            scopes,
            sockets,
            local_addrs,
            tracker: ConnectionTracker::new(),
        })
    }

    /// Bound address of the named scope.
    pub fn local_addr(&self, scope: &str) -> Option<SocketAddr> {
        self.scopes
            .iter()
            .position(|s| s.name() == scope)
            .map(|i| self.local_addrs[i])
    }

    pub fn scope(&self, name: &str) -> Option<Arc<Scope>> {
        self.scopes.iter().find(|s| s.name() == name).cloned()
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Rebuild every registry from `config` and publish them.
    ///
    /// All or nothing: if any scope fails to build, no scope changes.
    /// Listener settings are fixed at startup and only logged when changed.
    pub fn reload(&mut self, config: InspectConfig) -> Result<(), ServerError> {
        let mut registries = build_registries(&config, self.loader.as_ref())?;

        for scope in &self.scopes {
            let Some(server) = config.servers.iter().find(|s| s.name == scope.name()) else {
                tracing::warn!(scope = %scope.name(), "Server removed from config; restart to apply");
                continue;
            };

            let current = scope.config();
            if server.listen != current.listen
                || server.upstream != current.upstream
                || server.protocol != current.protocol
            {
                tracing::warn!(scope = %scope.name(), "Listener settings changed; restart to apply");
            }

            if let Some(registry) = registries.remove(scope.name()) {
                tracing::info!(
                    scope = %scope.name(),
                    modules = registry.len(),
                    enabled = registry.enabled().count(),
                    "Registry reloaded"
                );
                scope.registry().publish(registry);
            }
        }

        for name in registries.keys() {
            tracing::warn!(scope = %name, "New server in config; restart to apply");
        }

        self.config = config;
        Ok(())
    }

    /// Serve until `shutdown` fires, applying configs from `config_updates`.
    pub async fn run(
        mut self,
        mut config_updates: mpsc::UnboundedReceiver<InspectConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let timeouts = self.config.timeouts.clone();
        let connect_timeout = Duration::from_secs(timeouts.connect_secs);
        let udp_idle = Duration::from_secs(timeouts.udp_idle_secs);

        let mut tasks = JoinSet::new();
        let sockets = std::mem::take(&mut self.sockets);
        for (scope, socket) in self.scopes.iter().zip(sockets) {
            let scope = Arc::clone(scope);
            let tracker = self.tracker.clone();
            let stop = shutdown.resubscribe();
            match socket {
                BoundSocket::Tcp(listener) => {
                    tasks.spawn(tcp::serve(scope, listener, tracker, connect_timeout, stop));
                }
                BoundSocket::Udp { socket, upstream } => {
                    tasks.spawn(udp::serve(scope, socket, upstream, tracker, udp_idle, stop));
                }
            }
        }

        tracing::info!(scopes = self.scopes.len(), "Inspection server running");

        loop {
            tokio::select! {
                Some(config) = config_updates.recv() => {
                    if let Err(e) = self.reload(config) {
                        tracing::error!(error = %e, "Reload rejected, keeping current registries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping listeners");
                    break;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Listener task failed");
            }
        }

        let grace = Duration::from_secs(timeouts.shutdown_grace_secs);
        let remaining = self.tracker.drain(grace).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Shutdown grace expired with open sessions");
        }

        tracing::info!("Inspection server stopped");
        Ok(())
    }
}

async fn resolve_listen(scope: &str, listen: &str) -> Result<SocketAddr, ServerError> {
    let invalid = || ServerError::InvalidListen {
        scope: scope.to_string(),
        value: listen.to_string(),
    };
    tokio::net::lookup_host(listen)
        .await
        .map_err(|_| invalid())?
        .next()
        .ok_or_else(invalid)
}

async fn resolve_upstream(scope: &str, upstream: &str) -> Result<SocketAddr, ServerError> {
    let invalid = || ServerError::InvalidUpstream {
        scope: scope.to_string(),
        value: upstream.to_string(),
    };
    let addr = tokio::net::lookup_host(upstream)
        .await
        .map_err(|_| invalid())?
        .next()
        .ok_or_else(invalid)?;
    tracing::debug!(scope, upstream, resolved = %addr, "Upstream resolved");
    Ok(addr)
}
