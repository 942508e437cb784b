//! Dispatch of plaintext HTTP connections by Host header

use super::response::RELAY_NOT_CONNECTED;
use super::{InternalHandlers, RouteDecision, execute};
use crate::error::Result;
use crate::hostnames::{ACME_CHALLENGE_PREFIX, Hostnames, PLAIN_PORT};
use crate::registry::RelayRegistry;
use crate::socket::BoxedSocket;
use spacekit_core::tracing::metrics::counter;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Routes sockets from the plain listener.
///
/// Internal hosts are upgraded to HTTPS; relay hosts only receive ACME
/// HTTP-01 challenge requests.
#[derive(Clone)]
pub struct PlainDispatcher {
    hostnames: Arc<Hostnames>,
    registry: RelayRegistry,
    handlers: InternalHandlers,
}

impl PlainDispatcher {
    pub fn new(
        hostnames: Arc<Hostnames>,
        registry: RelayRegistry,
        handlers: InternalHandlers,
    ) -> Self {
        Self {
            hostnames,
            registry,
            handlers,
        }
    }

    pub fn route(&self, hostname: &str, path: &str) -> RouteDecision {
        if hostname == self.hostnames.base_host() {
            return RouteDecision::RedirectTo(format!(
                "https://{}{path}",
                self.hostnames.web_hostname()
            ));
        }
        if self.hostnames.is_internal(hostname) {
            return RouteDecision::RedirectTo(format!("https://{hostname}{path}"));
        }
        if !path.starts_with(ACME_CHALLENGE_PREFIX) {
            return RouteDecision::RejectUnsupported;
        }
        match self.registry.lookup(hostname) {
            Some(relay) => RouteDecision::ForwardToRelay {
                relay,
                port: PLAIN_PORT,
            },
            None => RouteDecision::RejectWithMessage(RELAY_NOT_CONNECTED),
        }
    }

    #[instrument(name = "plain_dispatch", skip(self, socket), fields(decision = tracing::field::Empty))]
    pub async fn dispatch(&self, socket: BoxedSocket, hostname: &str, path: &str) -> Result<()> {
        counter("relay_plain_connections_total").increment();
        let decision = self.route(hostname, path);
        tracing::Span::current().record("decision", decision.label());
        debug!("Routing plain connection");
        execute(decision, socket, hostname, &self.handlers).await
    }
}
