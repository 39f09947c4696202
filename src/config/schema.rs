//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML.
//!
//! ```toml
//! [[modules]]                       # inherited by servers without rules
//! directive = "dump builtin on /var/log/inspect"
//!
//! [[servers]]
//! name = "dns"
//! listen = "0.0.0.0:5353"
//! upstream = "10.0.0.53:53"
//! protocol = "udp"
//!
//! [[servers.modules]]
//! name = "dump"
//! library = "builtin"
//! state = "on"
//! args = ["/var/log/inspect"]
//! ```

use serde::{Deserialize, Serialize};

use crate::inspect::error::RegistryError;
use crate::inspect::registry::{RuleDescriptor, STATE_ON};
use crate::inspect::tuple::Transport;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct InspectConfig {
    /// Proxied services, one configuration scope each.
    pub servers: Vec<ServerConfig>,

    /// Rules for servers that define none of their own.
    pub modules: Vec<RuleConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl InspectConfig {
    /// The rules that apply to `server`: its own, or the top-level ones.
    pub fn rules_for<'a>(&'a self, server: &'a ServerConfig) -> &'a [RuleConfig] {
        if server.modules.is_empty() {
            &self.modules
        } else {
            &server.modules
        }
    }
}

/// One proxied service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Scope name for logs and metrics.
    pub name: String,

    /// Listen address (e.g., "0.0.0.0:8443").
    pub listen: String,

    /// Upstream address (e.g., "10.0.0.7:443").
    pub upstream: String,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Maximum concurrent client connections (TCP only).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Inspection rules, in dispatch order.
    #[serde(default)]
    pub modules: Vec<RuleConfig>,
}

fn default_max_connections() -> usize {
    1024
}

/// Transport of a proxied service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolConfig {
    #[default]
    Tcp,
    Udp,
}

impl From<ProtocolConfig> for Transport {
    fn from(protocol: ProtocolConfig) -> Self {
        match protocol {
            ProtocolConfig::Tcp => Transport::Stream,
            ProtocolConfig::Udp => Transport::Datagram,
        }
    }
}

/// One inspection rule, as a table or as a directive line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RuleConfig {
    Directive(RuleDirective),
    Table(RuleTable),
}

/// `directive = "<name> <library> <on|off> [arg...]"`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDirective {
    pub directive: String,
}

/// Structured rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuleTable {
    /// Module name, also the entry point symbol.
    pub name: String,

    /// Library the entry point is resolved from.
    pub library: String,

    /// "on" or "off".
    #[serde(default = "default_state")]
    pub state: String,

    /// Module-specific arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_state() -> String {
    STATE_ON.to_string()
}

impl RuleConfig {
    /// Convert to the registry's input form.
    pub fn to_descriptor(&self) -> Result<RuleDescriptor, RegistryError> {
        match self {
            RuleConfig::Directive(d) => {
                let tokens: Vec<&str> = d.directive.split_whitespace().collect();
                RuleDescriptor::from_directive(&tokens)
            }
            RuleConfig::Table(t) => Ok(RuleDescriptor {
                name: t.name.clone(),
                library: t.library.clone().into(),
                state: t.state.clone(),
                args: t.args.clone(),
            }),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Idle time after which a UDP client session is dropped, in seconds.
    pub udp_idle_secs: u64,

    /// How long shutdown waits for open connections, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            udp_idle_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
