//! Public TCP listeners
//!
//! Both listeners peek at the first bytes of each connection to learn its
//! hostname without consuming anything, then hand the untouched stream to a
//! dispatcher. Connections whose hostname cannot be determined are dropped.

pub mod request_head;
pub mod sni;

use crate::dispatch::{PlainDispatcher, SecureDispatcher};
use crate::error::{RelayError, Result};
use request_head::{MAX_REQUEST_HEAD, RequestHead, parse_request_head};
use sni::{MAX_CLIENT_HELLO, extract_sni};
use spacekit_core::tracing::ConnectionId;
use spacekit_core::tracing::metrics::{counter, gauge, histogram};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{Instrument, debug, info, info_span, warn};

/// Pause between peeks while waiting for more of the first flight
const PEEK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Settings shared by both listeners
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub max_connections: usize,
    pub sniff_timeout: Duration,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            sniff_timeout: Duration::from_secs(5),
        }
    }
}

/// Accept TLS connections and route them by SNI
pub async fn serve_secure(
    listener: TcpListener,
    settings: ListenerSettings,
    dispatcher: SecureDispatcher,
) -> Result<()> {
    info!("Secure listener on {}", listener.local_addr()?);
    let sniff_timeout = settings.sniff_timeout;
    accept_loop(listener, settings, "secure", move |stream, _peer| {
        let dispatcher = dispatcher.clone();
        async move {
            let hostname = sniff(&stream, sniff_timeout, MAX_CLIENT_HELLO, extract_sni).await?;
            tracing::Span::current().record("hostname", hostname.as_str());
            dispatcher.dispatch(Box::new(stream), &hostname).await
        }
    })
    .await
}

/// Accept plaintext HTTP connections and route them by Host and path
pub async fn serve_plain(
    listener: TcpListener,
    settings: ListenerSettings,
    dispatcher: PlainDispatcher,
) -> Result<()> {
    info!("Plain listener on {}", listener.local_addr()?);
    let sniff_timeout = settings.sniff_timeout;
    accept_loop(listener, settings, "plain", move |stream, _peer| {
        let dispatcher = dispatcher.clone();
        async move {
            let RequestHead { host, path } =
                sniff(&stream, sniff_timeout, MAX_REQUEST_HEAD, parse_request_head).await?;
            tracing::Span::current().record("hostname", host.as_str());
            dispatcher.dispatch(Box::new(stream), &host, &path).await
        }
    })
    .await
}

async fn accept_loop<F, Fut>(
    listener: TcpListener,
    settings: ListenerSettings,
    kind: &'static str,
    handle: F,
) -> Result<()>
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(settings.max_connections));
    let active_gauge = format!("relay_{kind}_connections_active");
    let duration_histogram = format!("relay_{kind}_connection_duration_seconds");
    let error_counter = format!("relay_{kind}_connection_errors_total");

    loop {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RelayError::Config("connection semaphore closed".into()))?;

        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed on {kind} listener: {e}");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {e}");
        }

        let connection_id = ConnectionId::new();
        let span = match kind {
            "secure" => info_span!(
                "secure_connection",
                %peer_addr,
                connection_id = %connection_id,
                hostname = tracing::field::Empty
            ),
            _ => info_span!(
                "plain_connection",
                %peer_addr,
                connection_id = %connection_id,
                hostname = tracing::field::Empty
            ),
        };

        let connection = handle(stream, peer_addr);
        let active_gauge = active_gauge.clone();
        let duration_histogram = duration_histogram.clone();
        let error_counter = error_counter.clone();

        tokio::spawn(
            async move {
                let started = Instant::now();
                gauge(&active_gauge).increment();

                let result = connection.await;

                histogram(&duration_histogram).observe_duration(started.elapsed());
                gauge(&active_gauge).decrement();

                match result {
                    Ok(()) => debug!("Connection finished"),
                    Err(RelayError::Io(e)) => debug!("Connection closed: {e}"),
                    Err(e) => {
                        counter(&error_counter).increment();
                        warn!("Dropping connection: {e}");
                    }
                }
                drop(permit);
            }
            .instrument(span),
        );
    }
}

/// Peek until `parse` yields a value, the buffer fills, or `limit` elapses
async fn sniff<T>(
    stream: &TcpStream,
    limit: Duration,
    max_len: usize,
    parse: impl Fn(&[u8]) -> Result<Option<T>>,
) -> Result<T> {
    let mut buf = vec![0u8; max_len];
    let peeking = async {
        let mut last_len = 0;
        loop {
            let n = stream.peek(&mut buf).await?;
            if n == 0 {
                return Err(RelayError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            if n != last_len {
                if let Some(value) = parse(&buf[..n])? {
                    return Ok(value);
                }
                last_len = n;
            }
            if n == buf.len() {
                return Err(RelayError::InvalidRequest(
                    "Hostname not found in first flight".into(),
                ));
            }
            tokio::time::sleep(PEEK_RETRY_INTERVAL).await;
        }
    };

    timeout(limit, peeking)
        .await
        .map_err(|_| RelayError::Timeout("waiting for hostname".into()))?
}
