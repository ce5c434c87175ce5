//! # Peerlink
//!
//! Peer-to-peer room messaging with presence, host election, and
//! automatic reconnection.
//!
//! A [`RoomManager`] holds one peer identity and any number of room
//! channels. Each channel runs the presence protocol over a pluggable
//! transport: peers announce themselves on join, exchange roster
//! snapshots, and deterministically elect the longest-standing member
//! as host. Application traffic rides the same channel as named events,
//! broadcasts, or plain text messages.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use peerlink::prelude::*;
//! use peerlink::transport::MemoryNetwork;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PeerlinkError> {
//!     let manager = RoomManager::new(MemoryNetwork::new());
//!     manager.on("chat", |n| println!("[{}] {}", n.room, n.data));
//!
//!     manager.join_room("lobby").await?;
//!     manager
//!         .emit(
//!             &RoomId::from("lobby"),
//!             "chat",
//!             serde_json::json!({ "text": "hello" }),
//!         )
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! The layers underneath are usable on their own and re-exported here:
//! [`protocol`] for the wire envelope, [`transport`] for connectors and
//! relays, [`channel`] for single-room channels.

mod error;
mod manager;
mod registry;

pub use error::PeerlinkError;
pub use manager::{JoinOutcome, PresenceHooks, RoomManager};
pub use registry::{HandlerId, Listener, ListenerRegistry, Notification};

pub use peerlink_channel as channel;
pub use peerlink_protocol as protocol;
pub use peerlink_transport as transport;

/// Commonly used types, for glob import.
pub mod prelude {
    pub use crate::{
        HandlerId, JoinOutcome, Notification, PeerlinkError, PresenceHooks,
        RoomManager,
    };
    pub use peerlink_channel::{
        ChannelConfig, ChannelState, ChannelStatus,
    };
    pub use peerlink_protocol::{PeerId, RoomId};
}

/// Installs a `tracing` subscriber reading `RUST_LOG`, defaulting to
/// `info`. Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
