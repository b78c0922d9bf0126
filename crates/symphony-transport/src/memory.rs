//! In-memory transport.
//!
//! [`pair`] returns a server-side [`MemoryTransport`] and the [`MemoryPeer`]
//! that plays the client. Used to drive connections in tests without sockets.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{
    is_expected_close_code, Transport, TransportError, TransportEvent, TransportSink,
    TransportStream, CLOSE_NORMAL,
};

/// A message travelling over the in-memory pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Frame(Bytes),
    Ping,
    Pong,
    Close(Option<u16>),
}

/// Create a connected transport/peer pair with the given pipe capacity.
#[must_use]
pub fn pair(capacity: usize) -> (MemoryTransport, MemoryPeer) {
    let (to_peer, from_server) = mpsc::channel(capacity);
    let (to_server, from_peer) = mpsc::channel(capacity);
    let closes = Arc::new(AtomicUsize::new(0));

    let transport = MemoryTransport {
        to_peer,
        from_peer,
        closes: closes.clone(),
    };
    let peer = MemoryPeer {
        tx: to_server,
        rx: from_server,
        closes,
    };
    (transport, peer)
}

/// Server side of an in-memory pipe.
pub struct MemoryTransport {
    to_peer: mpsc::Sender<PeerMessage>,
    from_peer: mpsc::Receiver<PeerMessage>,
    closes: Arc<AtomicUsize>,
}

impl Transport for MemoryTransport {
    fn split(self: Box<Self>) -> (Box<dyn TransportStream>, Box<dyn TransportSink>) {
        let stream = MemoryStream {
            from_peer: self.from_peer,
        };
        let sink = MemorySink {
            to_peer: self.to_peer,
            closes: self.closes,
        };
        (Box::new(stream), Box::new(sink))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryStream {
    from_peer: mpsc::Receiver<PeerMessage>,
}

#[async_trait]
impl TransportStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        loop {
            match self.from_peer.recv().await {
                Some(PeerMessage::Frame(data)) => return Ok(Some(TransportEvent::Frame(data))),
                Some(PeerMessage::Pong) => return Ok(Some(TransportEvent::Pong)),
                Some(PeerMessage::Ping) => continue,
                Some(PeerMessage::Close(code)) => {
                    if is_expected_close_code(code) {
                        return Ok(None);
                    }
                    return Err(TransportError::Closed(code));
                }
                None => return Ok(None),
            }
        }
    }
}

struct MemorySink {
    to_peer: mpsc::Sender<PeerMessage>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.to_peer
            .send(PeerMessage::Frame(frame))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.to_peer
            .send(PeerMessage::Ping)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        // The peer may already be gone.
        let _ = self.to_peer.try_send(PeerMessage::Close(Some(CLOSE_NORMAL)));
        Ok(())
    }
}

/// Client side of an in-memory pipe.
pub struct MemoryPeer {
    tx: mpsc::Sender<PeerMessage>,
    rx: mpsc::Receiver<PeerMessage>,
    closes: Arc<AtomicUsize>,
}

impl MemoryPeer {
    /// Send an application frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub async fn send_frame(&self, frame: impl Into<Bytes>) -> Result<(), TransportError> {
        self.send(PeerMessage::Frame(frame.into())).await
    }

    /// Send a liveness pong to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub async fn send_pong(&self) -> Result<(), TransportError> {
        self.send(PeerMessage::Pong).await
    }

    /// Send a close with the given code.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub async fn close(&self, code: u16) -> Result<(), TransportError> {
        self.send(PeerMessage::Close(Some(code))).await
    }

    async fn send(&self, message: PeerMessage) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next raw message from the server.
    pub async fn recv(&mut self) -> Option<PeerMessage> {
        self.rx.recv().await
    }

    /// Receive the next application frame, answering pings along the way.
    ///
    /// Returns `None` once the server closes the transport.
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await? {
                PeerMessage::Frame(data) => return Some(data),
                PeerMessage::Ping => {
                    let _ = self.tx.send(PeerMessage::Pong).await;
                }
                PeerMessage::Pong => {}
                PeerMessage::Close(_) => return None,
            }
        }
    }

    /// Number of times the server closed its side of the transport.
    #[must_use]
    pub fn transport_closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (transport, mut peer) = pair(8);
        let (mut stream, mut sink) = Box::new(transport).split();

        peer.send_frame(b"hello".to_vec()).await.unwrap();
        assert_eq!(
            stream.recv().await.unwrap(),
            Some(TransportEvent::Frame(Bytes::from_static(b"hello")))
        );

        sink.send(Bytes::from_static(b"world")).await.unwrap();
        assert_eq!(peer.next_frame().await, Some(Bytes::from_static(b"world")));
    }

    #[tokio::test]
    async fn test_peer_answers_ping() {
        let (transport, mut peer) = pair(8);
        let (mut stream, mut sink) = Box::new(transport).split();

        sink.ping().await.unwrap();
        sink.send(Bytes::from_static(b"after")).await.unwrap();
        assert_eq!(peer.next_frame().await, Some(Bytes::from_static(b"after")));
        assert_eq!(stream.recv().await.unwrap(), Some(TransportEvent::Pong));
    }

    #[tokio::test]
    async fn test_close_codes() {
        let (transport, peer) = pair(8);
        let (mut stream, _sink) = Box::new(transport).split();

        peer.close(1011).await.unwrap();
        assert!(matches!(
            stream.recv().await,
            Err(TransportError::Closed(Some(1011)))
        ));

        peer.close(CLOSE_NORMAL).await.unwrap();
        assert_eq!(stream.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_is_counted() {
        let (transport, mut peer) = pair(8);
        let (_stream, mut sink) = Box::new(transport).split();

        sink.close().await.unwrap();
        assert_eq!(peer.transport_closes(), 1);
        assert_eq!(peer.next_frame().await, None);
    }
}
