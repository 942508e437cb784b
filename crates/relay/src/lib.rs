//! Spacekit relay edge node
//!
//! Accepts public connections on the TLS and plaintext ports, routes them by
//! SNI or Host header, and hands each one either to the built-in API/Web
//! handlers or to the reverse-tunnel relay registered for that hostname.
//!
//! Tunnel clients connect to `wss://<api host>/relay` and authenticate with
//! the `x-spacekit-*` headers; once accepted they own
//! `<subdomain>.<username>.<base host>` until their channel closes.

pub mod channel;
pub mod cloudflare;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod dns;
pub mod error;
pub mod handlers;
pub mod handshake;
pub mod hostnames;
pub mod listener;
pub mod registry;
pub mod relay;
pub mod server;
pub mod socket;

#[cfg(test)]
mod test_utils;

pub use config::RelayServerConfig;
pub use dispatch::{InternalHandlers, PlainDispatcher, RouteDecision, SecureDispatcher};
pub use error::{RelayError, Result};
pub use handshake::{HandshakeOutcome, RelayHandshake, Rejection};
pub use hostnames::Hostnames;
pub use registry::{Registration, RelayRegistry};
pub use relay::{Relay, RelayChannel, RelayId};
pub use server::RelayServer;
pub use socket::BoxedSocket;
