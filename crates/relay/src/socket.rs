//! Type-erased byte streams handed between listeners, dispatchers and relays

use tokio::io::{AsyncRead, AsyncWrite};

/// Any bidirectional byte stream the dispatchers can route
pub trait AsyncSocket: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncSocket for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Owned, boxed socket
pub type BoxedSocket = Box<dyn AsyncSocket>;
