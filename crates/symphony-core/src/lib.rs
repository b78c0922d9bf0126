//! # symphony-core
//!
//! Connection lifecycle, live membership registry and action dispatch for
//! the Symphony chat hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Connection** - One client transport with its read, write and
//!   processing tasks
//! - **Registry** - Who is connected, and which chat members are reachable
//! - **Hub** - Turns inbound actions into chat service calls and fan-out
//! - **ChatService** - Permission-checked chat operations the hub consumes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│     Hub     │────▶│ ChatService │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │                   ▼
//!        │            ┌─────────────┐
//!        └────────────│  Registry   │
//!          fan-out    └─────────────┘
//! ```

pub mod chat;
pub mod connection;
pub mod hub;
pub mod registry;
pub mod store;

pub use chat::{Chat, ChatError, ChatService, Participant, Permission, Role};
pub use connection::{
    CloseReason, Connection, ConnectionConfig, ConnectionHandler, ConnectionId, ConnectionState,
};
pub use hub::{Hub, HubConfig, ACTOR_MISMATCH};
pub use registry::{Registry, RegistryStats};
pub use store::MemoryChatService;
