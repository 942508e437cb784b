//! Test doubles shared by the unit tests

use crate::error::{RelayError, Result};
use crate::relay::RelayChannel;
use crate::socket::BoxedSocket;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// In-memory relay channel that records forwarded sockets
#[derive(Default)]
pub struct TestChannel {
    added: Mutex<Vec<(String, u16)>>,
    sockets: Mutex<Vec<BoxedSocket>>,
    closed: CancellationToken,
}

impl TestChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// (hostname, port) of every socket added so far
    pub fn added(&self) -> Vec<(String, u16)> {
        self.added.lock().unwrap().clone()
    }

    /// Take ownership of the forwarded sockets
    pub fn take_sockets(&self) -> Vec<BoxedSocket> {
        std::mem::take(&mut *self.sockets.lock().unwrap())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl RelayChannel for TestChannel {
    async fn add_socket(&self, socket: BoxedSocket, hostname: &str, port: u16) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::ChannelClosed);
        }
        self.added.lock().unwrap().push((hostname.to_string(), port));
        self.sockets.lock().unwrap().push(socket);
        Ok(())
    }

    fn close(&self) {
        self.closed.cancel();
    }

    async fn closed(&self) {
        self.closed.cancelled().await;
    }
}
