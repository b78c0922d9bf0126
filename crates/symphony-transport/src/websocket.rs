//! WebSocket transport implementation.
//!
//! This module adapts an upgraded axum `WebSocket` to the transport traits.
//! Outbound frames are sent as text messages; inbound text and binary
//! messages are both accepted as frames.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, trace};

use crate::traits::{
    is_expected_close_code, Transport, TransportError, TransportEvent, TransportSink,
    TransportStream,
};

/// An upgraded WebSocket connection.
pub struct WebSocketTransport {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
}

impl WebSocketTransport {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            remote_addr: None,
        }
    }

    /// Record the peer address for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl Transport for WebSocketTransport {
    fn split(self: Box<Self>) -> (Box<dyn TransportStream>, Box<dyn TransportSink>) {
        let (sink, stream) = self.socket.split();
        (
            Box::new(WebSocketStream { stream }),
            Box::new(WebSocketSink { sink }),
        )
    }

    fn name(&self) -> &'static str {
        "websocket"
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// Receiving half of a [`WebSocketTransport`].
pub struct WebSocketStream {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl TransportStream for WebSocketStream {
    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(TransportEvent::Frame(Bytes::from(text))));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(TransportEvent::Frame(Bytes::from(data))));
                }
                Some(Ok(Message::Pong(_))) => {
                    return Ok(Some(TransportEvent::Pong));
                }
                Some(Ok(Message::Ping(_))) => {
                    // The socket answers pings on its own.
                    trace!("Received ping");
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map(|f| f.code);
                    debug!(code = ?code, "Received close frame");
                    if is_expected_close_code(code) {
                        return Ok(None);
                    }
                    return Err(TransportError::Closed(code));
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}

/// Sending half of a [`WebSocketTransport`].
pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let text =
            String::from_utf8(frame.to_vec()).map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
