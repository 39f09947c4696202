//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check addresses parse and names are unique
//! - Check every rule converts to a well-formed descriptor
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Does not resolve modules; that needs a loader and happens at build time

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{InspectConfig, RuleConfig};
use crate::inspect::module::ModuleArgument;
use crate::inspect::registry::{STATE_OFF, STATE_ON};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no servers configured")]
    NoServers,

    #[error("server #{0} has an empty name")]
    EmptyServerName(usize),

    #[error("duplicate server name `{0}`")]
    DuplicateServer(String),

    #[error("server `{server}`: invalid listen address `{value}`")]
    InvalidListen { server: String, value: String },

    #[error("server `{server}`: invalid upstream `{value}`, expected host:port")]
    InvalidUpstream { server: String, value: String },

    #[error("server `{0}`: max_connections must be greater than 0")]
    ZeroConnections(String),

    #[error("{scope}: rule #{rule}: {reason}")]
    InvalidRule {
        scope: String,
        rule: usize,
        reason: String,
    },

    #[error("timeouts.{0} must be greater than 0")]
    ZeroTimeout(&'static str),
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &InspectConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.servers.is_empty() {
        errors.push(ValidationError::NoServers);
    }

    let mut names = HashSet::new();
    for (i, server) in config.servers.iter().enumerate() {
        if server.name.trim().is_empty() {
            errors.push(ValidationError::EmptyServerName(i + 1));
        } else if !names.insert(server.name.as_str()) {
            errors.push(ValidationError::DuplicateServer(server.name.clone()));
        }

        if server.listen.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidListen {
                server: server.name.clone(),
                value: server.listen.clone(),
            });
        }

        if !is_host_port(&server.upstream) {
            errors.push(ValidationError::InvalidUpstream {
                server: server.name.clone(),
                value: server.upstream.clone(),
            });
        }

        if server.max_connections == 0 {
            errors.push(ValidationError::ZeroConnections(server.name.clone()));
        }

        validate_rules(&format!("server `{}`", server.name), &server.modules, &mut errors);
    }

    validate_rules("modules", &config.modules, &mut errors);

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_secs"));
    }
    if config.timeouts.udp_idle_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("udp_idle_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_rules(scope: &str, rules: &[RuleConfig], errors: &mut Vec<ValidationError>) {
    for (i, rule) in rules.iter().enumerate() {
        let invalid = |reason: String| ValidationError::InvalidRule {
            scope: scope.to_string(),
            rule: i + 1,
            reason,
        };

        let descriptor = match rule.to_descriptor() {
            Ok(d) => d,
            Err(e) => {
                errors.push(invalid(e.to_string()));
                continue;
            }
        };

        if descriptor.name.is_empty() {
            errors.push(invalid("empty module name".to_string()));
        }
        if descriptor.library.as_os_str().is_empty() {
            errors.push(invalid("empty library path".to_string()));
        }
        if descriptor.state != STATE_ON && descriptor.state != STATE_OFF {
            errors.push(invalid(format!(
                "invalid state `{}`, expected `on` or `off`",
                descriptor.state
            )));
        }
        for (index, arg) in descriptor.args.iter().enumerate() {
            if let Err(e) = ModuleArgument::new(arg) {
                errors.push(invalid(format!("argument {index}: {e}")));
            }
        }
    }
}

fn is_host_port(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
