//! Transport abstraction traits for Symphony.
//!
//! A transport is one physical bidirectional stream to one client. It is
//! split into a receiving half and a sending half so reads and writes can be
//! driven by independent tasks.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code for an endpoint going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// WebSocket close code for a connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Check whether a close code is an expected way for a client to leave.
///
/// A missing code counts as expected.
#[must_use]
pub fn is_expected_close_code(code: Option<u16>) -> bool {
    matches!(
        code,
        None | Some(CLOSE_NORMAL) | Some(CLOSE_GOING_AWAY) | Some(CLOSE_ABNORMAL)
    )
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Peer closed with an unexpected close code.
    #[error("Closed by peer with code {0:?}")]
    Closed(Option<u16>),

    /// Operation timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error describes an ordinary client departure rather than a fault.
    #[must_use]
    pub fn is_expected_closure(&self) -> bool {
        match self {
            TransportError::ConnectionClosed => true,
            TransportError::Closed(code) => is_expected_close_code(*code),
            _ => false,
        }
    }
}

/// Something received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An application frame.
    Frame(Bytes),
    /// A liveness pong.
    Pong,
}

/// A physical connection that has completed its handshake.
pub trait Transport: Send {
    /// Split into independently owned receive and send halves.
    fn split(self: Box<Self>) -> (Box<dyn TransportStream>, Box<dyn TransportSink>);

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// Receiving half of a transport.
#[async_trait]
pub trait TransportStream: Send {
    /// Receive the next event from the peer.
    ///
    /// Returns `None` if the peer ended the stream or closed it with an
    /// expected close code.
    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError>;
}

/// Sending half of a transport.
#[async_trait]
pub trait TransportSink: Send {
    /// Send an application frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Send a liveness ping.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the transport gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}
