//! Plaintext listener routing over real TCP connections

use async_trait::async_trait;
use spacekit_relay::handlers::ConnectionHandler;
use spacekit_relay::listener::{ListenerSettings, serve_plain};
use spacekit_relay::{
    BoxedSocket, Hostnames, InternalHandlers, PlainDispatcher, Registration, Relay, RelayChannel,
    RelayRegistry, Result,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

struct NoopHandler;

#[async_trait]
impl ConnectionHandler for NoopHandler {
    async fn deliver(&self, _socket: BoxedSocket) -> Result<()> {
        Ok(())
    }
}

/// Answers every forwarded socket with a fixed ACME token
#[derive(Default)]
struct AcmeResponder {
    seen: Mutex<Vec<(String, u16)>>,
    closed: Notify,
}

#[async_trait]
impl RelayChannel for AcmeResponder {
    async fn add_socket(&self, mut socket: BoxedSocket, hostname: &str, port: u16) -> Result<()> {
        self.seen.lock().unwrap().push((hostname.to_string(), port));
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\ntoken")
                .await;
            let _ = socket.shutdown().await;
        });
        Ok(())
    }

    fn close(&self) {
        self.closed.notify_waiters();
    }

    async fn closed(&self) {
        self.closed.notified().await;
    }
}

async fn start(registry: RelayRegistry) -> std::net::SocketAddr {
    let handlers = InternalHandlers {
        api: Arc::new(NoopHandler),
        web: Arc::new(NoopHandler),
    };
    let dispatcher = PlainDispatcher::new(
        Arc::new(Hostnames::new("spacekit.io")),
        registry,
        handlers,
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let settings = ListenerSettings {
        max_connections: 16,
        sniff_timeout: Duration::from_secs(2),
    };
    tokio::spawn(serve_plain(listener, settings, dispatcher));
    addr
}

async fn request(addr: std::net::SocketAddr, host: &str, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: {host}\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn test_base_host_redirects_to_web() {
    let addr = start(RelayRegistry::new()).await;
    let response = request(addr, "spacekit.io", "/docs").await;
    assert_eq!(
        response,
        "HTTP/1.1 301 Moved Permanently\r\nLocation: https://www.spacekit.io/docs\r\n\r\n"
    );
}

#[tokio::test]
async fn test_non_acme_path_rejected() {
    let addr = start(RelayRegistry::new()).await;
    let response = request(addr, "blog.alice.spacekit.io", "/index.html").await;
    assert_eq!(
        response,
        "HTTP/1.1 500 Only ACME requests supported\r\n\r\nOnly ACME requests supported"
    );
}

#[tokio::test]
async fn test_acme_request_forwarded_to_relay_on_port_80() {
    let registry = RelayRegistry::new();
    let channel = Arc::new(AcmeResponder::default());
    let registration = registry.register_if_absent(Arc::new(Relay::new(
        "blog.alice.spacekit.io",
        "42",
        channel.clone(),
    )));
    assert_eq!(registration, Registration::Accepted);

    let addr = start(registry).await;
    let response = request(
        addr,
        "blog.alice.spacekit.io:80",
        "/.well-known/acme-challenge/abc",
    )
    .await;

    assert!(response.ends_with("token"), "{response}");
    assert_eq!(
        channel.seen.lock().unwrap().as_slice(),
        &[("blog.alice.spacekit.io".to_string(), 80)]
    );
}
