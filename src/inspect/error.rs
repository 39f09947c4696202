//! Error taxonomy for the inspection layer.
//!
//! # Propagation
//! - `InspectError` is surfaced to the proxy runtime for one chunk; the
//!   chunk is dropped from inspection, the data path is unaffected.
//! - `RegistryError` is surfaced to the configuration loader and aborts the
//!   build of the affected scope.
//! - Per-module status codes are never errors here: see `StatusCode`.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while turning one chunk into a `TransferRecord`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InspectError {
    /// The transport layer could not report one of the two endpoints.
    #[error("{side} endpoint unavailable")]
    EndpointUnavailable { side: EndpointSide },

    /// The payload does not fit the 16-bit length field.
    #[error("payload of {len} bytes exceeds the 65535-byte record limit")]
    PayloadTooLarge { len: usize },
}

/// Which side of the session was missing during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSide {
    Local,
    Remote,
}

impl std::fmt::Display for EndpointSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointSide::Local => write!(f, "local"),
            EndpointSide::Remote => write!(f, "remote"),
        }
    }
}

/// A status integer outside the closed `StatusCode` set.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invariant violation: module returned unknown status {0}")]
pub struct InvariantViolation(pub i32);

/// Failures of the module-loading collaborator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("library not found: {}", .0.display())]
    LibraryNotFound(PathBuf),

    #[error("symbol `{symbol}` not found in {}", .library.display())]
    SymbolNotFound { library: PathBuf, symbol: String },
}

/// A module argument longer than its 8-bit length prefix allows.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("module argument of {len} bytes exceeds the 255-byte limit")]
pub struct ArgumentTooLong {
    pub len: usize,
}

/// Failures while building a `ModuleRegistry` for one scope.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The entry point of a rule could not be resolved.
    #[error("rule #{rule} ({module}): could not load module from {}: {source}", .library.display())]
    ModuleLoad {
        rule: usize,
        module: String,
        library: PathBuf,
        #[source]
        source: LoadError,
    },

    /// The enabled flag is neither `on` nor `off`.
    #[error("rule #{rule} ({module}): invalid state `{value}`, expected `on` or `off`")]
    InvalidState {
        rule: usize,
        module: String,
        value: String,
    },

    /// A module argument could not be stored.
    #[error("rule #{rule} ({module}): argument {index}: {source}")]
    Argument {
        rule: usize,
        module: String,
        index: usize,
        #[source]
        source: ArgumentTooLong,
    },

    /// The directive form has too few or too many tokens.
    #[error("`modules` directive takes 3 to 7 arguments, got {0}")]
    DirectiveArity(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InspectError::EndpointUnavailable { side: EndpointSide::Remote };
        assert_eq!(err.to_string(), "remote endpoint unavailable");

        let err = RegistryError::ModuleLoad {
            rule: 2,
            module: "dump".into(),
            library: PathBuf::from("/opt/mods/libdump.so"),
            source: LoadError::LibraryNotFound(PathBuf::from("/opt/mods/libdump.so")),
        };
        let msg = err.to_string();
        assert!(msg.contains("dump"));
        assert!(msg.contains("/opt/mods/libdump.so"));
        assert!(msg.contains("rule #2"));
    }
}
