//! Error types for the channel layer.

use peerlink_protocol::ProtocolError;
use peerlink_transport::TransportError;

/// Errors that can occur while opening or operating a channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// All reconnection attempts were used up without restoring the
    /// channel. Terminal; the channel is closed afterwards.
    #[error("reconnection exhausted after {attempts} attempts")]
    ReconnectionExhausted { attempts: u32 },

    /// The channel actor is gone (already closed or panicked).
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}
