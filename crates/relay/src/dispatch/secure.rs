//! Dispatch of TLS connections by SNI hostname

use super::response::RELAY_NOT_CONNECTED;
use super::{InternalHandlers, RouteDecision, execute};
use crate::error::Result;
use crate::hostnames::{Hostnames, SECURE_PORT};
use crate::registry::RelayRegistry;
use crate::socket::BoxedSocket;
use spacekit_core::tracing::metrics::counter;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Routes sockets from the secure listener. The TLS stream is untouched;
/// relays receive the raw ClientHello and terminate TLS themselves.
#[derive(Clone)]
pub struct SecureDispatcher {
    hostnames: Arc<Hostnames>,
    registry: RelayRegistry,
    handlers: InternalHandlers,
}

impl SecureDispatcher {
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

    /// API host, then Web host, then the registry
    pub fn route(&self, hostname: &str) -> RouteDecision {
        if hostname == self.hostnames.api_hostname() {
            RouteDecision::ForwardToApi
        } else if hostname == self.hostnames.web_hostname() {
            RouteDecision::ForwardToWeb
        } else if let Some(relay) = self.registry.lookup(hostname) {
            RouteDecision::ForwardToRelay {
                relay,
                port: SECURE_PORT,
            }
        } else {
            RouteDecision::RejectWithMessage(RELAY_NOT_CONNECTED)
        }
    }

    #[instrument(name = "secure_dispatch", skip(self, socket), fields(decision = tracing::field::Empty))]
    pub async fn dispatch(&self, socket: BoxedSocket, hostname: &str) -> Result<()> {
        counter("relay_secure_connections_total").increment();
        let decision = self.route(hostname);
        tracing::Span::current().record("decision", decision.label());
        debug!("Routing secure connection");
        execute(decision, socket, hostname, &self.handlers).await
    }
}
