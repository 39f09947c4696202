//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → connection.rs (session id, endpoints, tracking)
//!     → Hand off to proxy::tcp
//!
//! Incoming UDP datagram
//!     → datagram.rs (sender plus the address it was sent to)
//!     → connection.rs (session per client and local address)
//!     → Hand off to proxy::udp
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Every session is tracked for graceful shutdown

pub mod connection;
pub mod datagram;
pub mod listener;
