//! Routing of inbound connections
//!
//! Both dispatchers split into a pure `route` step that yields a
//! [`RouteDecision`] and an async `dispatch` step that carries it out on the
//! socket.

pub mod plain;
pub mod response;
pub mod secure;

pub use plain::PlainDispatcher;
pub use secure::SecureDispatcher;

use crate::error::Result;
use crate::handlers::ConnectionHandler;
use crate::relay::Relay;
use crate::socket::BoxedSocket;
use response::{ONLY_ACME_SUPPORTED, error_response, redirect_response, respond_and_close};
use spacekit_core::tracing::metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

/// What to do with one inbound connection
#[derive(Debug, Clone)]
pub enum RouteDecision {
    /// Hand the socket to the API handler
    ForwardToApi,
    /// Hand the socket to the Web handler
    ForwardToWeb,
    /// Forward to a registered relay, tagged with the inbound port
    ForwardToRelay { relay: Arc<Relay>, port: u16 },
    /// Answer with a 301 to this location
    RedirectTo(String),
    /// Answer with a 500 carrying this message
    RejectWithMessage(&'static str),
    /// Plaintext request outside the ACME challenge path
    RejectUnsupported,
}

impl RouteDecision {
    pub fn label(&self) -> &'static str {
        match self {
            RouteDecision::ForwardToApi => "forward_api",
            RouteDecision::ForwardToWeb => "forward_web",
            RouteDecision::ForwardToRelay { .. } => "forward_relay",
            RouteDecision::RedirectTo(_) => "redirect",
            RouteDecision::RejectWithMessage(_) => "reject_message",
            RouteDecision::RejectUnsupported => "reject_unsupported",
        }
    }
}

/// The API and Web handlers internal traffic is delivered to
#[derive(Clone)]
pub struct InternalHandlers {
    pub api: Arc<dyn ConnectionHandler>,
    pub web: Arc<dyn ConnectionHandler>,
}

/// Carry out `decision` on `socket`
pub(crate) async fn execute(
    decision: RouteDecision,
    mut socket: BoxedSocket,
    hostname: &str,
    handlers: &InternalHandlers,
) -> Result<()> {
    counter(&format!("relay_route_{}_total", decision.label())).increment();

    match decision {
        RouteDecision::ForwardToApi => handlers.api.deliver(socket).await,
        RouteDecision::ForwardToWeb => handlers.web.deliver(socket).await,
        RouteDecision::ForwardToRelay { relay, port } => {
            debug!(relay = %relay.id(), port, "Forwarding to relay");
            if let Err(e) = relay.add_socket(socket, hostname, port).await {
                warn!(relay = %relay.id(), "Relay refused socket: {e}");
                return Err(e);
            }
            Ok(())
        }
        RouteDecision::RedirectTo(location) => {
            respond_and_close(&mut socket, &redirect_response(&location)).await?;
            Ok(())
        }
        RouteDecision::RejectWithMessage(message) => {
            respond_and_close(&mut socket, &error_response(message)).await?;
            Ok(())
        }
        RouteDecision::RejectUnsupported => {
            respond_and_close(&mut socket, &error_response(ONLY_ACME_SUPPORTED)).await?;
            Ok(())
        }
    }
}
