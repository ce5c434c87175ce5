//! Error types for the protocol layer.
//!
//! Each Peerlink crate defines its own error enum. A `ProtocolError`
//! always means a serialization problem, never a networking or room
//! management one.

/// Errors that can occur while encoding or strictly decoding messages.
///
/// Note that the inbound channel path doesn't produce these: it uses
/// [`crate::decode_frame`], which degrades to a raw frame instead of
/// failing. Strict decoding is for typed payload accessors and tests.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, or a
    /// payload that doesn't match the action's expected shape.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),
}
