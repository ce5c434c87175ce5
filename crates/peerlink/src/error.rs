//! Error types for the top-level API.

use peerlink_channel::ChannelError;
use peerlink_protocol::RoomId;

/// Errors returned by [`RoomManager`](crate::RoomManager) operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerlinkError {
    /// A channel operation failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The manager already has a live channel into this room.
    #[error("already joined room {0}")]
    AlreadyJoined(RoomId),

    /// The manager has no channel into this room.
    #[error("not joined to room {0}")]
    NotJoined(RoomId),
}
