//! # symphony-transport
//!
//! Transport abstraction layer for the Symphony chat hub.
//!
//! This crate provides a unified interface over the physical streams that
//! carry envelopes between clients and the hub:
//!
//! - **WebSocket** - an upgraded axum socket
//! - **Memory** - a channel pipe with a scripted peer, for tests
//!
//! ## Transport Abstraction
//!
//! A `Transport` is split into a `TransportStream` and a `TransportSink` so
//! the reader and writer of one connection can run as separate tasks.
//!
//! ```rust,ignore
//! use symphony_transport::{Transport, TransportEvent};
//!
//! async fn drain(transport: Box<dyn Transport>) {
//!     let (mut stream, _sink) = transport.split();
//!     while let Ok(Some(TransportEvent::Frame(frame))) = stream.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{
    is_expected_close_code, Transport, TransportError, TransportEvent, TransportSink,
    TransportStream,
};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
