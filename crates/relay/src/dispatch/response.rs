//! Raw HTTP responses written straight onto dispatched sockets

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How long to drain unread request bytes after responding
const LINGER: Duration = Duration::from_secs(1);

pub const RELAY_NOT_CONNECTED: &str = "Relay not connected";
pub const ONLY_ACME_SUPPORTED: &str = "Only ACME requests supported";

/// `HTTP/1.1 500 <message>` with the message repeated as the body
pub fn error_response(message: &str) -> String {
    format!("HTTP/1.1 500 {message}\r\n\r\n{message}")
}

/// Permanent redirect to `location`
pub fn redirect_response(location: &str) -> String {
    format!("HTTP/1.1 301 Moved Permanently\r\nLocation: {location}\r\n\r\n")
}

/// Write `response`, close the write half, then drain what the client sent.
///
/// Closing a TCP socket with unread input resets the connection, which can
/// discard the response before the client reads it.
pub async fn respond_and_close<S>(socket: &mut S, response: &str) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await?;

    let mut scratch = [0u8; 1024];
    let _ = tokio::time::timeout(LINGER, async {
        while let Ok(n) = socket.read(&mut scratch).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
    Ok(())
}
