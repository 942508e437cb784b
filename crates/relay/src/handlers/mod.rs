//! Handlers that own connections for the API and Web hostnames

pub mod api;
pub mod tls;
pub mod web;

pub use api::{ApiState, create_api_router};
pub use tls::load_tls_acceptor;
pub use web::create_web_router;

use crate::error::{RelayError, Result};
use crate::socket::BoxedSocket;
use async_trait::async_trait;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server;
use spacekit_core::tracing::metrics::{counter, gauge};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tower::Service;
use tracing::{debug, instrument};

/// Receives whole connections from a dispatcher
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Take ownership of `socket` and serve it to completion
    async fn deliver(&self, socket: BoxedSocket) -> Result<()>;
}

/// Terminates TLS and serves an axum router over the decrypted stream
#[derive(Clone)]
pub struct TlsHttpHandler {
    name: &'static str,
    acceptor: TlsAcceptor,
    router: Router,
}

impl TlsHttpHandler {
    pub fn new(name: &'static str, acceptor: TlsAcceptor, router: Router) -> Self {
        Self {
            name,
            acceptor,
            router,
        }
    }
}

impl std::fmt::Debug for TlsHttpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsHttpHandler")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl ConnectionHandler for TlsHttpHandler {
    #[instrument(name = "internal_handler", skip_all, fields(handler = self.name))]
    async fn deliver(&self, socket: BoxedSocket) -> Result<()> {
        let stream = self
            .acceptor
            .accept(socket)
            .await
            .map_err(|e| RelayError::Tls(format!("TLS handshake failed: {e}")))?;

        gauge("relay_internal_connections_active").increment();
        counter("relay_internal_connections_total").increment();
        let result = serve_http(stream, self.router.clone()).await;
        gauge("relay_internal_connections_active").decrement();
        result
    }
}

/// Serve HTTP/1.1 or HTTP/2 on `io` until the peer disconnects.
///
/// Upgrades are enabled so WebSocket routes work.
pub async fn serve_http<S>(io: S, router: Router) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let io = TokioIo::new(io);
    let service =
        hyper::service::service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
            router.clone().call(request)
        });

    server::conn::auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(io, service)
        .await
        .map_err(|e| RelayError::Http(e.to_string()))?;

    debug!("HTTP connection completed");
    Ok(())
}
