//! Codec for encoding and decoding Symphony envelopes.
//!
//! Envelopes travel as one JSON document per transport frame.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::envelope::{ActionRequest, ActionResult, Event};

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame was empty.
    #[error("Empty frame")]
    Empty,

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode any envelope to bytes.
///
/// # Errors
///
/// Returns an error if the envelope is too large or encoding fails.
pub fn encode<T: Serialize>(envelope: &T) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(envelope)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode any envelope from bytes.
///
/// # Errors
///
/// Returns an error if the data is empty, too large, or not a valid envelope.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Empty);
    }

    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    Ok(serde_json::from_slice(data)?)
}

/// Decode an inbound action request.
///
/// # Errors
///
/// Returns an error if the frame is not a well-formed action request.
pub fn decode_request(data: &[u8]) -> Result<ActionRequest, ProtocolError> {
    decode(data)
}

/// Encode an action result.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_result(result: &ActionResult) -> Result<Bytes, ProtocolError> {
    encode(result)
}

/// Encode an event.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_event(event: &Event) -> Result<Bytes, ProtocolError> {
    encode(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ChatId, UserId};

    #[test]
    fn test_decode_request_from_client_json() {
        let user = UserId::generate();
        let raw = format!(
            r#"{{"chat_action":"CREATE_CHAT","payload":{{"user_id":"{}","chat_name":"Trip"}}}}"#,
            user
        );

        let request = decode_request(raw.as_bytes()).unwrap();
        assert_eq!(request, ActionRequest::create_chat(user, "Trip"));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode_request(b""), Err(ProtocolError::Empty)));
        assert!(matches!(
            decode_request(b"{not json"),
            Err(ProtocolError::Json(_))
        ));

        // Ids must be UUIDs.
        let raw = br#"{"chat_action":"LEAVE_CHAT","payload":{"chat_id":"x","user_id":"y"}}"#;
        assert!(matches!(decode_request(raw), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_frame_too_large() {
        let data = vec![b' '; MAX_FRAME_SIZE + 1];
        match decode_request(&data) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_event() {
        let event = Event::ChatDeleted {
            chat_id: ChatId::generate(),
            user_id: UserId::generate(),
        };
        let encoded = encode_event(&event).unwrap();
        let decoded: Event = decode(&encoded).unwrap();
        assert_eq!(decoded, event);
    }
}
