//! Room channels for Peerlink.
//!
//! A channel is one peer's live connection into one room: a transport,
//! the presence protocol running over it, and a reconnection cycle that
//! kicks in when the transport drops unexpectedly. Each channel runs as
//! its own Tokio task (see [`open_channel`]) and reports to the
//! application through a stream of [`ChannelEvent`]s.
//!
//! Layering inside the crate:
//!
//! - [`RoomState`] is the local roster, a plain data structure.
//! - [`PresenceEngine`] applies protocol rules to the roster and emits
//!   [`Effect`]s; it performs no I/O.
//! - The channel actor owns a transport and turns effects into sends
//!   and application events.

mod channel;
mod config;
mod election;
mod error;
mod presence;
mod state;

pub use channel::{
    open_channel, open_channel_with, ChannelEvent, ChannelHandle,
    ChannelState, ChannelStatus,
};
pub use config::ChannelConfig;
pub use election::{ElectionStrategy, OldestPeer};
pub use error::ChannelError;
pub use presence::{Effect, PresenceEngine};
pub use state::{PeerRecord, RoomState};
