//! Codec trait and the lossy frame discriminator.
//!
//! Outbound messages go through a [`Codec`] so the wire format stays
//! swappable; [`JsonCodec`] is the default and the only one peers
//! currently speak. Inbound traffic goes through [`decode_frame`], which
//! never fails: payloads that aren't recognizable protocol shapes degrade
//! to [`Frame::Raw`], favoring interoperability over strictness.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{Frame, ProtocolError, SystemMessage, UserMessage};

/// Encodes Rust types to wire text and decodes them back, strictly.
///
/// `Send + Sync + 'static` so a codec can be shared across the Tokio
/// worker threads that run channel actors.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into wire text.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes wire text back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the text is malformed or
    /// doesn't match the expected type.
    fn decode<T: DeserializeOwned>(&self, text: &str)
        -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        text: &str,
    ) -> Result<T, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

/// Discriminates an inbound payload into a [`Frame`].
///
/// Order of attempts:
/// 1. A JSON object whose `type` is `"SYSTEM"` parses as a
///    [`SystemMessage`].
/// 2. An object carrying both `peer_id` and `message` parses as a
///    [`UserMessage`].
/// 3. Everything else, including non-JSON text and structurally invalid
///    protocol messages, is delivered as [`Frame::Raw`].
pub fn decode_frame(text: &str) -> Frame {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Frame::Raw(text.to_string()),
    };

    if value.get("type").and_then(Value::as_str) == Some("SYSTEM") {
        return match serde_json::from_value::<SystemMessage>(value) {
            Ok(msg) => Frame::System(msg),
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    "malformed system message, delivering raw"
                );
                Frame::Raw(text.to_string())
            }
        };
    }

    if value.get("peer_id").is_some() && value.get("message").is_some() {
        if let Ok(msg) = serde_json::from_value::<UserMessage>(value) {
            return Frame::User(msg);
        }
    }

    Frame::Raw(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PeerId, SystemAction};
    use serde_json::json;

    #[test]
    fn test_json_codec_round_trip() {
        let codec = JsonCodec;
        let msg = SystemMessage::join(&PeerId::from("p1"), json!({"n": 1}));
        let text = codec.encode(&msg).unwrap();
        let back: SystemMessage = codec.decode(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_json_codec_decode_garbage_errors() {
        let codec = JsonCodec;
        let result: Result<SystemMessage, _> = codec.decode("not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_frame_system_message() {
        let text = serde_json::to_string(&SystemMessage::leave(
            &PeerId::from("p2"),
        ))
        .unwrap();
        match decode_frame(&text) {
            Frame::System(msg) => {
                assert_eq!(msg.action, SystemAction::PeerLeave);
                assert_eq!(msg.peer_id, PeerId::from("p2"));
            }
            other => panic!("expected system frame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_frame_user_message() {
        let text = r#"{"peer_id": "p1", "message": "hello"}"#;
        match decode_frame(text) {
            Frame::User(msg) => {
                assert_eq!(msg.peer_id, PeerId::from("p1"));
                assert_eq!(msg.message, json!("hello"));
            }
            other => panic!("expected user frame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_frame_non_json_degrades_to_raw() {
        assert_eq!(
            decode_frame("plain text ping"),
            Frame::Raw("plain text ping".to_string())
        );
    }

    #[test]
    fn test_decode_frame_unknown_object_degrades_to_raw() {
        let text = r#"{"kind": "mystery"}"#;
        assert_eq!(decode_frame(text), Frame::Raw(text.to_string()));
    }

    #[test]
    fn test_decode_frame_broken_system_message_degrades_to_raw() {
        // Has the SYSTEM tag but an unknown action, so strict parsing
        // fails; the payload must still reach the application.
        let text = r#"{"type": "SYSTEM", "action": "TELEPORT", "peer_id": "p1", "timestamp": 1}"#;
        assert_eq!(decode_frame(text), Frame::Raw(text.to_string()));
    }
}
