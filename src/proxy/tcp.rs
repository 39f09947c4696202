//! TCP session proxying.
//!
//! Each accepted client gets an upstream connection and two pumps. Every
//! chunk read is dispatched to the scope's registry, then forwarded.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::inspect::tuple::{Direction, Transport};
use crate::net::connection::{ConnectionTracker, Session};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::proxy::scope::Scope;

/// Read buffer per direction.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Accept loop for one TCP scope. Returns when `shutdown` fires.
pub async fn serve(
    scope: Arc<Scope>,
    listener: Listener,
    tracker: ConnectionTracker,
    connect_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    let scope = Arc::clone(&scope);
                    let tracker = tracker.clone();
                    tokio::spawn(async move {
                        handle_connection(scope, stream, peer, permit, tracker, connect_timeout).await;
                    });
                }
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(scope = %scope.name(), error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            _ = shutdown.recv() => {
                tracing::info!(scope = %scope.name(), "TCP listener stopping");
                break;
            }
        }
    }
}

async fn handle_connection(
    scope: Arc<Scope>,
    client: TcpStream,
    peer: SocketAddr,
    _permit: ConnectionPermit,
    tracker: ConnectionTracker,
    connect_timeout: Duration,
) {
    let local = match client.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::warn!(scope = %scope.name(), peer = %peer, error = %e, "Client socket has no local address");
            return;
        }
    };
    let session = Session::new(local, peer, Transport::Stream);
    let _guard = tracker.track(&session);
    scope.check_session(&session);

    let upstream_addr = &scope.config().upstream;
    let upstream = match tokio::time::timeout(connect_timeout, TcpStream::connect(upstream_addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::warn!(session = %session.id, upstream = %upstream_addr, error = %e, "Upstream connect failed");
            return;
        }
        Err(_) => {
            tracing::warn!(session = %session.id, upstream = %upstream_addr, "Upstream connect timed out");
            return;
        }
    };

    tracing::debug!(
        scope = %scope.name(),
        session = %session.id,
        client = %peer,
        upstream = %upstream_addr,
        "Session established"
    );

    let (client_rd, client_wr) = client.into_split();
    let (upstream_rd, upstream_wr) = upstream.into_split();

    let (sent, received) = tokio::join!(
        pump(&scope, &session, client_rd, upstream_wr, Direction::Downstream),
        pump(&scope, &session, upstream_rd, client_wr, Direction::FromUpstream),
    );

    tracing::debug!(
        session = %session.id,
        bytes_to_upstream = sent.as_ref().ok(),
        bytes_to_client = received.as_ref().ok(),
        "Session finished"
    );
}

/// Copy `reader` to `writer`, inspecting each chunk before it is forwarded.
pub async fn pump<R, W>(
    scope: &Scope,
    session: &Session,
    mut reader: R,
    mut writer: W,
    direction: Direction,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                writer.shutdown().await?;
                return Ok(total);
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(session = %session.id, direction = direction.as_str(), error = %e, "Read failed");
                return Err(e);
            }
        };

        let chunk = &buf[..n];
        scope.inspect(session, chunk, direction);
        writer.write_all(chunk).await?;
        total += n as u64;
    }
}
