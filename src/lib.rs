//! Packet inspection for a TCP/UDP proxy.
//!
//! Every chunk the proxy forwards is described as a `TransferRecord` and
//! handed to the modules configured for its server scope, in order.

pub mod config;
pub mod inspect;
pub mod lifecycle;
pub mod modules;
pub mod net;
pub mod observability;
pub mod proxy;

pub use config::schema::InspectConfig;
pub use inspect::{DispatchEngine, ModuleRegistry, StatusCode, TransferRecord};
pub use lifecycle::Shutdown;
pub use proxy::InspectServer;
