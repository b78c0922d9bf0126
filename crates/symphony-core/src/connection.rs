//! Connection lifecycle for Symphony.
//!
//! A [`Connection`] owns one physical transport for one authenticated user.
//! Once started it runs three tasks:
//!
//! - **read** - receives frames from the transport into the inbound queue and
//!   refreshes the liveness deadline on every pong
//! - **write** - drains the outbound queue to the transport and pings on a
//!   fixed interval, closing the connection when the peer stops answering
//! - **process** - hands inbound frames to the [`ConnectionHandler`] in order
//!
//! ```text
//!  transport ──read──▶ inbound queue ──process──▶ handler (hub)
//!  transport ◀─write── outbound queue ◀─enqueue── handler (hub)
//! ```
//!
//! Teardown runs exactly once no matter how many tasks or callers request it:
//! both queues are closed, the transport is closed, and the handler is told
//! the connection is gone.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use symphony_protocol::UserId;
use symphony_transport::{Transport, TransportError, TransportEvent, TransportSink, TransportStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Counter for connection identifiers.
static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Capacity of the outbound (hub to client) queue.
    pub outbound_capacity: usize,
    /// Capacity of the inbound (client to hub) queue.
    pub inbound_capacity: usize,
    /// Interval between liveness pings.
    pub ping_interval: Duration,
    /// Maximum silence after the last pong before the connection is dropped.
    pub pong_timeout: Duration,
    /// Upper bound for any single write to the transport.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            inbound_capacity: 256,
            ping_interval: Duration::from_secs(54),
            pong_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer ended the stream or sent an expected close.
    PeerClosed,
    /// Receiving from the transport failed.
    ReadError,
    /// Sending to the transport failed or timed out.
    WriteError,
    /// No pong arrived within the pong timeout.
    LivenessTimeout,
    /// Closed by a local caller.
    Requested,
}

/// Receiver of a connection's inbound frames and closure notice.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Handle one inbound frame. Frames of one connection arrive in order.
    async fn handle_frame(&self, connection: &Arc<Connection>, frame: Bytes);

    /// Called exactly once when the connection is torn down.
    async fn connection_closed(&self, connection: &Arc<Connection>);
}

enum Push {
    Queued,
    Full,
    Closed,
}

/// Bounded FIFO whose sending side can be shut from any holder.
struct FrameQueue {
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl FrameQueue {
    fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            sender: Mutex::new(Some(tx)),
        };
        (queue, rx)
    }

    fn lock(&self) -> MutexGuard<'_, Option<mpsc::Sender<Bytes>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_push(&self, frame: Bytes) -> Push {
        match self.lock().as_ref() {
            None => Push::Closed,
            Some(tx) => match tx.try_send(frame) {
                Ok(()) => Push::Queued,
                Err(mpsc::error::TrySendError::Full(_)) => Push::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Push::Closed,
            },
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.lock().clone()
    }

    fn close(&self) {
        self.lock().take();
    }
}

/// Parts handed to the tasks on start.
struct Pending {
    stream: Box<dyn TransportStream>,
    outbound: mpsc::Receiver<Bytes>,
    inbound: mpsc::Receiver<Bytes>,
}

/// One live client connection.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    transport: &'static str,
    remote_addr: Option<String>,
    config: ConnectionConfig,
    state: AtomicU8,
    state_tx: watch::Sender<ConnectionState>,
    close_reason: OnceLock<CloseReason>,
    outbound: FrameQueue,
    inbound: FrameQueue,
    sink: tokio::sync::Mutex<Option<Box<dyn TransportSink>>>,
    opened_at: Instant,
    /// Milliseconds after `opened_at` at which the last pong arrived.
    last_pong_ms: AtomicU64,
    handler: Weak<dyn ConnectionHandler>,
    pending: Mutex<Option<Pending>>,
}

impl Connection {
    /// Create a connection over an established transport.
    ///
    /// Nothing is read or written until [`Connection::start`] is called, so
    /// the owner can register the connection first.
    #[must_use]
    pub fn new<H>(
        transport: Box<dyn Transport>,
        user_id: UserId,
        config: ConnectionConfig,
        handler: &Arc<H>,
    ) -> Arc<Self>
    where
        H: ConnectionHandler + 'static,
    {
        let transport_name = transport.name();
        let remote_addr = transport.remote_addr();
        let (stream, sink) = transport.split();
        let (outbound, outbound_rx) = FrameQueue::new(config.outbound_capacity);
        let (inbound, inbound_rx) = FrameQueue::new(config.inbound_capacity);
        let (state_tx, _) = watch::channel(ConnectionState::Open);
        let handler: Weak<H> = Arc::downgrade(handler);
        let handler: Weak<dyn ConnectionHandler> = handler;

        Arc::new(Self {
            id: ConnectionId::next(),
            user_id,
            transport: transport_name,
            remote_addr,
            config,
            state: AtomicU8::new(OPEN),
            state_tx,
            close_reason: OnceLock::new(),
            outbound,
            inbound,
            sink: tokio::sync::Mutex::new(Some(sink)),
            opened_at: Instant::now(),
            last_pong_ms: AtomicU64::new(0),
            handler,
            pending: Mutex::new(Some(Pending {
                stream,
                outbound: outbound_rx,
                inbound: inbound_rx,
            })),
        })
    }

    /// Spawn the read, write and process tasks. Subsequent calls do nothing.
    pub fn start(self: &Arc<Self>) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(pending) = pending else {
            warn!(connection = %self.id, "Connection already started");
            return;
        };

        debug!(
            connection = %self.id,
            user = %self.user_id,
            transport = self.transport,
            remote = ?self.remote_addr,
            "Connection started"
        );

        tokio::spawn(self.clone().read_loop(pending.stream));
        tokio::spawn(self.clone().write_loop(pending.outbound));
        tokio::spawn(self.clone().process_loop(pending.inbound));
    }

    /// Get the connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the authenticated user owning this connection.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Get the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            OPEN => ConnectionState::Open,
            CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    /// Check whether the connection still accepts outbound frames.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    /// Why the connection was closed, once it has been.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    /// Queue a frame for delivery to the client.
    ///
    /// Never blocks. Returns `false` if the connection is closed (a silent
    /// no-op) or its outbound queue is full (the frame is dropped).
    pub fn enqueue(&self, frame: Bytes) -> bool {
        if !self.is_live() {
            trace!(connection = %self.id, "Enqueue on closed connection ignored");
            return false;
        }

        match self.outbound.try_push(frame) {
            Push::Queued => true,
            Push::Full => {
                warn!(
                    connection = %self.id,
                    user = %self.user_id,
                    "Outbound queue full, dropping frame"
                );
                false
            }
            Push::Closed => false,
        }
    }

    /// Wait until teardown has completed.
    pub async fn closed(&self) {
        let mut state = self.state_tx.subscribe();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Tear the connection down.
    ///
    /// Only the first call performs the release steps; later and concurrent
    /// calls return immediately.
    pub async fn close(self: &Arc<Self>, reason: CloseReason) {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let _ = self.close_reason.set(reason);
        self.state_tx.send_replace(ConnectionState::Closing);
        debug!(connection = %self.id, user = %self.user_id, reason = ?reason, "Closing connection");

        self.outbound.close();
        self.inbound.close();

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            match time::timeout(self.config.write_timeout, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(connection = %self.id, error = %e, "Transport close failed"),
                Err(_) => debug!(connection = %self.id, "Transport close timed out"),
            }
        }

        if let Some(handler) = self.handler.upgrade() {
            handler.connection_closed(self).await;
        }

        self.state.store(CLOSED, Ordering::Release);
        self.state_tx.send_replace(ConnectionState::Closed);
        debug!(connection = %self.id, user = %self.user_id, "Connection closed");
    }

    fn touch(&self) {
        let now = self.opened_at.elapsed().as_millis() as u64;
        self.last_pong_ms.store(now, Ordering::Relaxed);
    }

    fn liveness_expired(&self) -> bool {
        let now = self.opened_at.elapsed().as_millis() as u64;
        let silent = now.saturating_sub(self.last_pong_ms.load(Ordering::Relaxed));
        silent > self.config.pong_timeout.as_millis() as u64
    }

    /// Write a frame, or a ping when `frame` is `None`.
    async fn write(&self, frame: Option<Bytes>) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(TransportError::ConnectionClosed);
        };

        let write = async move {
            match frame {
                Some(frame) => sink.send(frame).await,
                None => sink.ping().await,
            }
        };

        match time::timeout(self.config.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn read_loop(self: Arc<Self>, mut stream: Box<dyn TransportStream>) {
        let mut state = self.state_tx.subscribe();

        let reason = loop {
            let event = tokio::select! {
                _ = leaving_open(&mut state) => return,
                event = stream.recv() => event,
            };

            match event {
                Ok(Some(TransportEvent::Frame(frame))) => {
                    let Some(inbound) = self.inbound.sender() else {
                        return;
                    };
                    tokio::select! {
                        _ = leaving_open(&mut state) => return,
                        sent = inbound.send(frame) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
                Ok(Some(TransportEvent::Pong)) => {
                    trace!(connection = %self.id, "Pong");
                    self.touch();
                }
                Ok(None) => {
                    debug!(connection = %self.id, user = %self.user_id, "Peer closed connection");
                    break CloseReason::PeerClosed;
                }
                Err(e) if e.is_expected_closure() => {
                    debug!(connection = %self.id, error = %e, "Peer went away");
                    break CloseReason::PeerClosed;
                }
                Err(e) => {
                    warn!(connection = %self.id, user = %self.user_id, error = %e, "Read error");
                    break CloseReason::ReadError;
                }
            }
        };

        self.close(reason).await;
    }

    async fn write_loop(self: Arc<Self>, mut outbound: mpsc::Receiver<Bytes>) {
        let mut state = self.state_tx.subscribe();
        let period = self.config.ping_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                biased;

                _ = leaving_open(&mut state) => return,

                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        return;
                    };
                    if let Err(e) = self.write(Some(frame)).await {
                        if !self.is_live() {
                            return;
                        }
                        warn!(connection = %self.id, user = %self.user_id, error = %e, "Write error");
                        break CloseReason::WriteError;
                    }
                }

                _ = ticker.tick() => {
                    if self.liveness_expired() {
                        warn!(connection = %self.id, user = %self.user_id, "Liveness timeout");
                        break CloseReason::LivenessTimeout;
                    }
                    if let Err(e) = self.write(None).await {
                        if !self.is_live() {
                            return;
                        }
                        warn!(connection = %self.id, user = %self.user_id, error = %e, "Ping failed");
                        break CloseReason::WriteError;
                    }
                    trace!(connection = %self.id, "Ping");
                }
            }
        };

        self.close(reason).await;
    }

    async fn process_loop(self: Arc<Self>, mut inbound: mpsc::Receiver<Bytes>) {
        while let Some(frame) = inbound.recv().await {
            if !self.is_live() {
                break;
            }
            let Some(handler) = self.handler.upgrade() else {
                break;
            };
            handler.handle_frame(&self, frame).await;
        }
        trace!(connection = %self.id, "Processing finished");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("transport", &self.transport)
            .field("state", &self.state())
            .finish()
    }
}

/// Resolves once the watched state is no longer `Open`.
async fn leaving_open(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state.wait_for(|s| *s != ConnectionState::Open).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use symphony_transport::memory::{self, MemoryPeer, PeerMessage};

    struct Recorder {
        frames: mpsc::UnboundedSender<Bytes>,
        closed: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionHandler for Recorder {
        async fn handle_frame(&self, _connection: &Arc<Connection>, frame: Bytes) {
            let _ = self.frames.send(frame);
        }

        async fn connection_closed(&self, _connection: &Arc<Connection>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            frames: tx,
            closed: AtomicUsize::new(0),
        });
        (recorder, rx)
    }

    fn open(config: ConnectionConfig, handler: &Arc<Recorder>) -> (Arc<Connection>, MemoryPeer) {
        let (transport, peer) = memory::pair(64);
        let conn = Connection::new(Box::new(transport), UserId::generate(), config, handler);
        (conn, peer)
    }

    fn quick_liveness() -> ConnectionConfig {
        ConnectionConfig {
            ping_interval: Duration::from_secs(1),
            pong_timeout: Duration::from_secs(3),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_inbound_frames_reach_handler_in_order() {
        let (handler, mut frames) = recorder();
        let (conn, peer) = open(ConnectionConfig::default(), &handler);
        conn.start();

        for i in 0..3u8 {
            peer.send_frame(vec![i]).await.unwrap();
        }

        for i in 0..3u8 {
            assert_eq!(frames.recv().await.unwrap(), Bytes::from(vec![i]));
        }
    }

    #[tokio::test]
    async fn test_outbound_frames_delivered_in_order() {
        let (handler, _frames) = recorder();
        let (conn, mut peer) = open(ConnectionConfig::default(), &handler);
        conn.start();

        assert!(conn.enqueue(Bytes::from_static(b"one")));
        assert!(conn.enqueue(Bytes::from_static(b"two")));

        assert_eq!(peer.next_frame().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(peer.next_frame().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_full_outbound_queue_drops_frame() {
        let (handler, _frames) = recorder();
        let config = ConnectionConfig {
            outbound_capacity: 2,
            ..Default::default()
        };
        // Not started, so nothing drains the queue.
        let (conn, _peer) = open(config, &handler);

        assert!(conn.enqueue(Bytes::from_static(b"1")));
        assert!(conn.enqueue(Bytes::from_static(b"2")));
        assert!(!conn.enqueue(Bytes::from_static(b"3")));
        assert!(conn.is_live());
    }

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let (handler, _frames) = recorder();
        let (conn, peer) = open(ConnectionConfig::default(), &handler);
        conn.start();

        let mut closers = Vec::new();
        for _ in 0..8 {
            let conn = conn.clone();
            closers.push(tokio::spawn(async move {
                conn.close(CloseReason::Requested).await;
            }));
        }
        let _ = peer.close(1000).await;
        for closer in closers {
            closer.await.unwrap();
        }
        conn.closed().await;

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(peer.transport_closes(), 1);
        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
        assert!(!conn.enqueue(Bytes::from_static(b"late")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_runs_once_across_all_tasks() {
        let (handler, _frames) = recorder();
        let config = ConnectionConfig {
            write_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        // A one-slot pipe the peer never drains, so the write task stalls.
        let (transport, peer) = memory::pair(1);
        let conn = Connection::new(Box::new(transport), UserId::generate(), config, &handler);
        conn.start();

        for i in 0..4u8 {
            assert!(conn.enqueue(Bytes::from(vec![i])));
        }

        // Every closer wakes at the instant the stalled write times out.
        let mut closers = Vec::new();
        for _ in 0..4 {
            let conn = conn.clone();
            closers.push(tokio::spawn(async move {
                time::sleep(Duration::from_secs(1)).await;
                conn.close(CloseReason::Requested).await;
            }));
        }
        time::sleep(Duration::from_secs(1)).await;
        let _ = peer.close(1000).await;

        for closer in closers {
            closer.await.unwrap();
        }
        conn.closed().await;

        assert!(matches!(
            conn.close_reason(),
            Some(CloseReason::WriteError | CloseReason::Requested | CloseReason::PeerClosed)
        ));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(peer.transport_closes(), 1);
        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_timeout_closes_connection() {
        let (handler, _frames) = recorder();
        let config = ConnectionConfig {
            write_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let (transport, peer) = memory::pair(1);
        let conn = Connection::new(Box::new(transport), UserId::generate(), config, &handler);
        conn.start();

        for i in 0..3u8 {
            conn.enqueue(Bytes::from(vec![i]));
        }
        conn.closed().await;

        assert_eq!(conn.close_reason(), Some(CloseReason::WriteError));
        assert_eq!(peer.transport_closes(), 1);
        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_peer_close_tears_down() {
        let (handler, _frames) = recorder();
        let (conn, peer) = open(ConnectionConfig::default(), &handler);
        conn.start();

        peer.close(1001).await.unwrap();
        conn.closed().await;

        assert_eq!(conn.close_reason(), Some(CloseReason::PeerClosed));
        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unexpected_close_is_read_error() {
        let (handler, _frames) = recorder();
        let (conn, peer) = open(ConnectionConfig::default(), &handler);
        conn.start();

        peer.close(1011).await.unwrap();
        conn.closed().await;

        assert_eq!(conn.close_reason(), Some(CloseReason::ReadError));
    }

    #[tokio::test]
    async fn test_dropped_peer_tears_down() {
        let (handler, _frames) = recorder();
        let (conn, peer) = open(ConnectionConfig::default(), &handler);
        conn.start();

        drop(peer);
        conn.closed().await;

        assert!(!conn.is_live());
        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_hits_liveness_timeout() {
        let (handler, _frames) = recorder();
        let (conn, mut peer) = open(quick_liveness(), &handler);
        conn.start();

        conn.closed().await;
        assert_eq!(conn.close_reason(), Some(CloseReason::LivenessTimeout));

        // The peer saw pings but never answered them.
        assert_eq!(peer.recv().await, Some(PeerMessage::Ping));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answering_peer_stays_live() {
        let (handler, _frames) = recorder();
        let (conn, mut peer) = open(quick_liveness(), &handler);
        conn.start();

        let responder = tokio::spawn(async move { while peer.next_frame().await.is_some() {} });

        time::sleep(Duration::from_secs(30)).await;
        assert!(conn.is_live());

        conn.close(CloseReason::Requested).await;
        responder.await.unwrap();
        assert_eq!(conn.close_reason(), Some(CloseReason::Requested));
    }
}
