//! Packet-inspection core.
//!
//! # Data Flow
//! ```text
//! proxy session delivers (connection, chunk, direction)
//!     → tuple.rs (endpoint extraction, direction swap)
//!     → record.rs (TransferRecord borrowing the chunk)
//!     → dispatch.rs (walk enabled bindings in order)
//!     → module.rs (Module::process → StatusCode)
//!     → dispatch.rs (log + count each status, continue)
//!
//! Registry construction (config load / reload):
//!     RuleDescriptor[]
//!     → registry.rs (copy arguments, parse on/off)
//!     → loader.rs (resolve entry point by library + symbol)
//!     → ModuleRegistry (immutable)
//!     → RegistryCell::publish (atomic swap per scope)
//! ```
//!
//! # Design Decisions
//! - Modules never affect the proxied data path
//! - Registries are shared read-only; reload replaces, never mutates
//! - Loading is behind `ModuleLoader` so the core has no loader dependency
//! - `dylib.rs` opens shared objects on Linux; `BuiltinLoader` elsewhere

pub mod dispatch;
#[cfg(target_os = "linux")]
pub mod dylib;
pub mod error;
pub mod loader;
pub mod module;
pub mod record;
pub mod registry;
pub mod tuple;

pub use dispatch::{DispatchEngine, DispatchReport, ModuleOutcome};
pub use error::{InspectError, LoadError, RegistryError};
pub use loader::{BuiltinLoader, ModuleLoader};
pub use module::{EntryPoint, Module, ModuleArgument};
pub use record::{StatusCode, TransferRecord};
pub use registry::{ModuleBinding, ModuleRegistry, RegistryCell, RuleDescriptor};
pub use tuple::{ConnectionInfo, Direction, EndpointTuple, Protocol, Transport, WireEndpoint};
