//! A connected, authenticated tunnel client

use crate::error::Result;
use crate::socket::BoxedSocket;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Control channel to a remote tunnel client.
///
/// Implementations fan accepted sockets out to the remote process and stream
/// bytes back. Only the contract below is relied on by the dispatch code.
#[async_trait]
pub trait RelayChannel: Send + Sync + 'static {
    /// Forward `socket` to the remote client, tagged with the hostname it was
    /// routed by and the public port it arrived on.
    async fn add_socket(&self, socket: BoxedSocket, hostname: &str, port: u16) -> Result<()>;

    /// Close the channel. Idempotent.
    fn close(&self);

    /// Resolves once the channel is closed, from either side.
    async fn closed(&self);
}

/// Process-unique identity of one relay registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayId(u64);

impl RelayId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relay-{}", self.0)
    }
}

/// One live registration: a hostname bound to the channel that serves it
pub struct Relay {
    id: RelayId,
    hostname: String,
    user_id: String,
    connected_at: DateTime<Utc>,
    channel: Arc<dyn RelayChannel>,
}

impl Relay {
    pub fn new(
        hostname: impl Into<String>,
        user_id: impl Into<String>,
        channel: Arc<dyn RelayChannel>,
    ) -> Self {
        Self {
            id: RelayId::next(),
            hostname: hostname.into(),
            user_id: user_id.into(),
            connected_at: Utc::now(),
            channel,
        }
    }

    pub fn id(&self) -> RelayId {
        self.id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Instruct the channel to accept `socket`
    pub async fn add_socket(&self, socket: BoxedSocket, hostname: &str, port: u16) -> Result<()> {
        self.channel.add_socket(socket, hostname, port).await
    }

    pub fn close(&self) {
        self.channel.close();
    }

    pub async fn closed(&self) {
        self.channel.closed().await;
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("id", &self.id)
            .field("hostname", &self.hostname)
            .field("user_id", &self.user_id)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
