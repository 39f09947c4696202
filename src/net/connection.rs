//! Session identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique session IDs for log correlation
//! - Describe a session's endpoints to the inspection layer
//! - Count open sessions for graceful shutdown and metrics

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::inspect::tuple::{ConnectionInfo, Protocol, Transport, WireEndpoint};
use crate::observability::metrics;

/// Global atomic counter for session IDs.
/// Relaxed ordering is enough: only uniqueness matters.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a proxied session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sess-{}", self.0)
    }
}

/// The client-facing side of a proxied session.
///
/// Both chunk directions are inspected against these endpoints; only the
/// source/destination assignment changes.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub id: SessionId,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub transport: Transport,
}

impl Session {
    pub fn new(local: SocketAddr, remote: SocketAddr, transport: Transport) -> Self {
        Self {
            id: SessionId::new(),
            local,
            remote,
            transport,
        }
    }
}

impl ConnectionInfo for Session {
    fn local_endpoint(&self) -> Option<WireEndpoint> {
        WireEndpoint::from_socket_addr(self.local)
    }

    fn remote_endpoint(&self) -> Option<WireEndpoint> {
        WireEndpoint::from_socket_addr(self.remote)
    }

    fn transport(&self) -> Transport {
        self.transport
    }
}

/// Counts open sessions.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new session. The returned guard ends it on drop.
    pub fn track(&self, session: &Session) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        let protocol = Protocol::from(session.transport);
        metrics::record_connection_opened(protocol);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: session.id,
            protocol,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every session has ended, or `grace` has passed.
    /// Returns the number of sessions still open.
    pub async fn drain(&self, grace: Duration) -> u64 {
        let deadline = tokio::time::Instant::now() + grace;
        while self.active_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.active_count()
    }
}

/// Guard for one session's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: SessionId,
    protocol: Protocol,
}

impl ConnectionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::record_connection_closed(self.protocol);
        tracing::trace!(session = %self.id, "Session closed");
    }
}
