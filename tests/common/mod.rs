//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use stream_inspect::config::loader::parse_config;
use stream_inspect::inspect::loader::{BuiltinLoader, ModuleLoader};
use stream_inspect::inspect::{EndpointTuple, Protocol, StatusCode};
use stream_inspect::proxy::Scope;
use stream_inspect::{InspectConfig, InspectServer};

/// Library path the recording module is registered under.
pub const RECORDER_LIBRARY: &str = "/test/librecorder.so";

/// One chunk as a module saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub tuple: EndpointTuple,
    pub protocol: Protocol,
    pub payload: Vec<u8>,
}

pub type SeenLog = Arc<Mutex<Vec<Seen>>>;

/// A loader with the bundled modules plus `recorder`, which logs every
/// record it receives and returns `Ok`.
pub fn recording_loader() -> (BuiltinLoader, SeenLog) {
    let seen: SeenLog = Arc::default();
    let log = Arc::clone(&seen);

    let mut loader = BuiltinLoader::with_builtins();
    loader.register_fn(RECORDER_LIBRARY, "recorder", move |record, _args| {
        log.lock().unwrap().push(Seen {
            tuple: *record.tuple(),
            protocol: record.protocol(),
            payload: record.payload().to_vec(),
        });
        StatusCode::Ok
    });
    (loader, seen)
}

/// Wait until `seen` holds at least `count` records.
pub async fn wait_for(seen: &SeenLog, count: usize) -> Vec<Seen> {
    for _ in 0..100 {
        {
            let records = seen.lock().unwrap();
            if records.len() >= count {
                return records.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {count} records, got {:?}", seen.lock().unwrap());
}

/// Start a TCP backend that echoes everything back.
pub async fn start_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Start a UDP backend that echoes every datagram to its sender.
#[allow(dead_code)]
pub async fn start_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], peer).await;
        }
    });

    addr
}

/// Config text for a single server named `edge` on an ephemeral port.
pub fn single_server(protocol: &str, upstream: SocketAddr, rules: &str) -> String {
    single_server_on("127.0.0.1:0", protocol, upstream, rules)
}

/// Like `single_server`, listening on `listen`.
pub fn single_server_on(listen: &str, protocol: &str, upstream: SocketAddr, rules: &str) -> String {
    format!(
        r#"
        [timeouts]
        connect_secs = 2
        udp_idle_secs = 5
        shutdown_grace_secs = 1

        [[servers]]
        name = "edge"
        listen = "{listen}"
        upstream = "{upstream}"
        protocol = "{protocol}"
        modules = [{rules}]
        "#
    )
}

pub fn config(text: &str) -> InspectConfig {
    parse_config(text).unwrap()
}

/// A bound server running in the background.
pub struct Running {
    pub addr: SocketAddr,
    pub updates: mpsc::UnboundedSender<InspectConfig>,
    pub shutdown: broadcast::Sender<()>,
    pub handle: JoinHandle<()>,
}

impl Running {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}

/// Bind `config` and run it until `Running::stop`.
pub async fn run_server(config: InspectConfig, loader: Arc<dyn ModuleLoader>) -> (Running, Arc<Scope>) {
    let server = InspectServer::bind(config, loader).await.unwrap();
    let addr = server.local_addr("edge").unwrap();
    let scope = server.scope("edge").unwrap();

    let (updates, rx) = mpsc::unbounded_channel();
    let (shutdown, stop) = broadcast::channel(1);
    let handle = tokio::spawn(async move {
        server.run(rx, stop).await.unwrap();
    });

    (
        Running {
            addr,
            updates,
            shutdown,
            handle,
        },
        scope,
    )
}
