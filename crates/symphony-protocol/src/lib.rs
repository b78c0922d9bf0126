//! # symphony-protocol
//!
//! Wire envelopes for the Symphony realtime chat hub.
//!
//! This crate defines the JSON messages exchanged between chat clients and
//! the hub, the identifier types they carry, and the codec that turns them
//! into transport frames.
//!
//! ## Envelopes
//!
//! - `ActionRequest` - client asks the hub to perform a chat action
//! - `ActionResult` - hub answers the acting client
//! - `Event` - hub notifies live chat members of a change
//!
//! ## Example
//!
//! ```rust
//! use symphony_protocol::{codec, ActionRequest, UserId};
//!
//! let request = ActionRequest::create_chat(UserId::generate(), "Trip");
//!
//! let encoded = codec::encode(&request).unwrap();
//! let decoded = codec::decode_request(&encoded).unwrap();
//! assert_eq!(request, decoded);
//! ```

pub mod codec;
pub mod envelope;
pub mod ids;

pub use codec::{decode, decode_request, encode, ProtocolError};
pub use envelope::{
    ActionKind, ActionRequest, ActionResult, ActionStatus, AdminDemoted, AdminPromoted,
    ChatCreated, ChatRef, ChatRenamed, Event, MemberAdded, MemberRemoved,
};
pub use ids::{unix_millis, ChatId, UserId};
