//! UDP datagram proxying.
//!
//! # Responsibilities
//! - Keep one upstream socket per client and local address
//! - Inspect each datagram in both directions before forwarding
//! - Drop client sessions after an idle period
//!
//! # Design Decisions
//! - The session map is owned by the receive loop; relays report their
//!   end over a channel instead of sharing the map
//! - A relay marks its session closed before exiting, so the receive loop
//!   never forwards into a socket nobody reads
//! - Client activity resets the relay's idle timer through a `Notify`
//! - The upstream address is resolved once at bind time

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Notify};

use crate::inspect::tuple::{Direction, Transport};
use crate::net::connection::{ConnectionGuard, ConnectionTracker, Session};
use crate::net::datagram::DatagramSocket;
use crate::proxy::scope::Scope;

/// Largest datagram accepted.
pub const MAX_DATAGRAM: usize = 64 * 1024;

/// Client address and the local address it sent to.
type SessionKey = (SocketAddr, SocketAddr);

struct ClientSession {
    upstream: Arc<UdpSocket>,
    activity: Arc<Notify>,
    closed: Arc<AtomicBool>,
    session: Session,
}

impl ClientSession {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Receive loop for one UDP scope. Returns when `shutdown` fires.
pub async fn serve(
    scope: Arc<Scope>,
    socket: DatagramSocket,
    upstream: SocketAddr,
    tracker: ConnectionTracker,
    idle: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let socket = Arc::new(socket);
    let mut sessions: HashMap<SessionKey, ClientSession> = HashMap::new();
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<SessionKey>();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let received = tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    tracing::debug!(scope = %scope.name(), error = %e, "UDP receive failed");
                    continue;
                }
            },
            Some(key) = closed_rx.recv() => {
                // The key may already belong to a newer session.
                if sessions.get(&key).is_some_and(ClientSession::is_closed) {
                    sessions.remove(&key);
                }
                continue;
            }
            _ = shutdown.recv() => {
                tracing::info!(scope = %scope.name(), sessions = sessions.len(), "UDP listener stopping");
                break;
            }
        };

        let key = (received.peer, received.local);
        if sessions.get(&key).is_some_and(ClientSession::is_closed) {
            sessions.remove(&key);
        }

        if !sessions.contains_key(&key) {
            let session = Session::new(received.local, received.peer, Transport::Datagram);
            scope.check_session(&session);

            match open_upstream(upstream).await {
                Ok(upstream_socket) => {
                    let client = ClientSession {
                        upstream: Arc::new(upstream_socket),
                        activity: Arc::new(Notify::new()),
                        closed: Arc::new(AtomicBool::new(false)),
                        session,
                    };
                    let relay = Relay {
                        scope: Arc::clone(&scope),
                        listen: Arc::clone(&socket),
                        upstream: Arc::clone(&client.upstream),
                        session,
                        key,
                        activity: Arc::clone(&client.activity),
                        closed: Arc::clone(&client.closed),
                        guard: tracker.track(&session),
                        idle,
                        closed_tx: closed_tx.clone(),
                    };
                    tokio::spawn(relay.run(shutdown.resubscribe()));
                    tracing::debug!(
                        scope = %scope.name(),
                        session = %session.id,
                        client = %received.peer,
                        local = %received.local,
                        "UDP session opened"
                    );
                    sessions.insert(key, client);
                }
                Err(e) => {
                    tracing::warn!(
                        scope = %scope.name(),
                        upstream = %upstream,
                        error = %e,
                        "Upstream socket setup failed"
                    );
                    continue;
                }
            }
        }

        let Some(client) = sessions.get(&key) else {
            continue;
        };
        let datagram = &buf[..received.len];
        client.activity.notify_one();
        scope.inspect(&client.session, datagram, Direction::Downstream);
        if let Err(e) = client.upstream.send(datagram).await {
            tracing::debug!(session = %client.session.id, error = %e, "Upstream send failed");
        }
    }
}

async fn open_upstream(target: SocketAddr) -> std::io::Result<UdpSocket> {
    let bind: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(target).await?;
    Ok(socket)
}

/// Upstream-to-client half of one UDP session.
struct Relay {
    scope: Arc<Scope>,
    listen: Arc<DatagramSocket>,
    upstream: Arc<UdpSocket>,
    session: Session,
    key: SessionKey,
    activity: Arc<Notify>,
    closed: Arc<AtomicBool>,
    guard: ConnectionGuard,
    idle: Duration,
    closed_tx: mpsc::UnboundedSender<SessionKey>,
}

impl Relay {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let session = self.session;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let n = tokio::select! {
                received = self.upstream.recv(&mut buf) => match received {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!(session = %session.id, error = %e, "Upstream receive failed");
                        break;
                    }
                },
                _ = self.activity.notified() => continue,
                _ = tokio::time::sleep(self.idle) => {
                    tracing::debug!(session = %session.id, "UDP session idle");
                    break;
                }
                _ = shutdown.recv() => break,
            };

            let datagram = &buf[..n];
            self.scope.inspect(&session, datagram, Direction::FromUpstream);
            if let Err(e) = self.listen.send_to(datagram, session.remote).await {
                tracing::debug!(session = %session.id, error = %e, "Client send failed");
            }
        }

        self.closed.store(true, Ordering::Release);
        drop(self.guard);
        let _ = self.closed_tx.send(self.key);
    }
}
