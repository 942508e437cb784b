//! WebSocket-backed relay channel
//!
//! Each forwarded socket becomes a numbered stream multiplexed over the
//! relay's WebSocket:
//!
//! - `{"type":"open","stream":N,"hostname":H,"port":P}` text frame announces a stream
//! - binary frames carry a 4-byte big-endian stream id followed by payload
//! - `{"type":"close","stream":N}` text frame ends a stream, from either side
//!
//! Closing the WebSocket closes every stream. A stream whose visitor stops
//! reading is reset on its own once its buffer fills; the WebSocket reader
//! never waits on a single stream.

use crate::error::{RelayError, Result};
use crate::relay::RelayChannel;
use crate::socket::BoxedSocket;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, trace, warn};

const OUTBOUND_CAPACITY: usize = 256;
const STREAM_CAPACITY: usize = 64;
const READ_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlFrame {
    Open {
        stream: u32,
        hostname: String,
        port: u16,
    },
    Close {
        stream: u32,
    },
}

impl ControlFrame {
    fn to_message(&self) -> Result<Message> {
        serde_json::to_string(self)
            .map(|text| Message::Text(text.into()))
            .map_err(|e| RelayError::Channel(e.to_string()))
    }
}

/// Inbound side of one forwarded socket
#[derive(Clone)]
struct StreamHandle {
    data: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

type StreamTable = Arc<DashMap<u32, StreamHandle>>;

pub struct WebSocketChannel {
    outbound: mpsc::Sender<Message>,
    streams: StreamTable,
    next_stream: AtomicU32,
    shutdown: CancellationToken,
}

impl WebSocketChannel {
    /// Start the reader and writer tasks for `socket`
    pub fn spawn(socket: WebSocket) -> Arc<Self> {
        let (sink, stream) = socket.split();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let streams: StreamTable = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        tokio::spawn(write_loop(sink, outbound_rx, shutdown.clone()).in_current_span());
        tokio::spawn(
            read_loop(stream, streams.clone(), outbound.clone(), shutdown.clone())
                .in_current_span(),
        );

        Arc::new(Self {
            outbound,
            streams,
            next_stream: AtomicU32::new(1),
            shutdown,
        })
    }
}

#[async_trait]
impl RelayChannel for WebSocketChannel {
    async fn add_socket(&self, socket: BoxedSocket, hostname: &str, port: u16) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(RelayError::ChannelClosed);
        }

        let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        let (inbound_tx, inbound_rx) = mpsc::channel(STREAM_CAPACITY);
        let cancel = self.shutdown.child_token();
        self.streams.insert(
            id,
            StreamHandle {
                data: inbound_tx,
                cancel: cancel.clone(),
            },
        );

        let open = ControlFrame::Open {
            stream: id,
            hostname: hostname.to_string(),
            port,
        }
        .to_message()?;
        if self.outbound.send(open).await.is_err() {
            self.streams.remove(&id);
            return Err(RelayError::ChannelClosed);
        }

        debug!(stream = id, hostname, port, "Opened relay stream");
        tokio::spawn(
            pump_socket(
                id,
                socket,
                inbound_rx,
                self.outbound.clone(),
                self.streams.clone(),
                cancel,
            )
            .in_current_span(),
        );
        Ok(())
    }

    fn close(&self) {
        self.shutdown.cancel();
    }

    async fn closed(&self) {
        self.shutdown.cancelled().await;
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Message>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        debug!("Relay WebSocket write failed: {e}");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
    shutdown.cancel();
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    streams: StreamTable,
    outbound: mpsc::Sender<Message>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Binary(frame))) => {
                if frame.len() < 4 {
                    warn!("Dropping short relay data frame");
                    continue;
                }
                let id = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
                let Some(handle) = streams.get(&id).map(|entry| entry.value().clone()) else {
                    trace!(stream = id, "Data for unknown stream");
                    continue;
                };
                match handle.data.try_send(frame.slice(4..)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(stream = id, "Visitor is not reading, resetting relay stream");
                        reset_stream(id, &streams, &outbound);
                    }
                    Err(TrySendError::Closed(_)) => {
                        streams.remove(&id);
                    }
                }
            }
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ControlFrame>(text.as_str()) {
                    Ok(ControlFrame::Close { stream: id }) => {
                        // Dropping the sender ends the socket's write side
                        streams.remove(&id);
                    }
                    Ok(frame) => debug!(?frame, "Ignoring control frame from relay"),
                    Err(e) => debug!("Invalid control frame from relay: {e}"),
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!("Relay WebSocket read failed: {e}");
                break;
            }
        }
    }

    streams.clear();
    shutdown.cancel();
}

/// Drop one stream and tell the client it is gone
fn reset_stream(id: u32, streams: &StreamTable, outbound: &mpsc::Sender<Message>) {
    if let Some((_, handle)) = streams.remove(&id) {
        handle.cancel.cancel();
    }
    if let Ok(close) = (ControlFrame::Close { stream: id }).to_message() {
        if outbound.try_send(close).is_err() {
            debug!(stream = id, "Could not queue close for reset stream");
        }
    }
}

/// Copy bytes between one forwarded socket and its stream on the channel.
/// `cancel` fires when the stream is reset or the whole channel closes.
async fn pump_socket(
    id: u32,
    socket: BoxedSocket,
    mut inbound: mpsc::Receiver<Bytes>,
    outbound: mpsc::Sender<Message>,
    streams: StreamTable,
    cancel: CancellationToken,
) {
    let (mut reader, mut writer) = tokio::io::split(socket);

    let upstream = async {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let mut frame = BytesMut::with_capacity(4 + n);
            frame.put_u32(id);
            frame.extend_from_slice(&buf[..n]);
            if outbound
                .send(Message::Binary(frame.freeze()))
                .await
                .is_err()
            {
                return;
            }
        }
        if let Ok(close) = (ControlFrame::Close { stream: id }).to_message() {
            let _ = outbound.send(close).await;
        }
    };

    let downstream = async {
        while let Some(chunk) = inbound.recv().await {
            if writer.write_all(&chunk).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    };

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = async { tokio::join!(upstream, downstream) } => {}
    }

    streams.remove(&id);
    trace!(stream = id, "Relay stream finished");
}
