//! Transport abstraction layer for Peerlink.
//!
//! A [`Transport`] owns one negotiated duplex channel to exactly one
//! remote endpoint. It is the seam between the presence protocol (which
//! only sees text payloads and status notifications) and whatever
//! actually carries bytes: a negotiated peer link, a direct WebSocket, or
//! the in-memory pair used by tests.
//!
//! The negotiation handshake itself is external to this crate: it is
//! modeled as an opaque [`PeerEndpoint`] capability, with the relay that
//! ferries offers and candidates behind the [`RelayClient`] trait.
//!
//! # Feature flags
//!
//! - `websocket` (default) — direct WebSocket peer links via
//!   `tokio-tungstenite`.
//! - `http-relay` (default) — [`HttpRelay`], a `reqwest`-based
//!   [`RelayClient`].

mod error;
mod memory;
mod negotiated;
mod relay;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use negotiated::{
    EndpointEvent, EndpointFactory, NegotiatedConnector, NegotiatedTransport,
    PeerEndpoint,
};
#[cfg(feature = "http-relay")]
pub use relay::HttpRelay;
pub use relay::RelayClient;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};

use std::future::Future;

use peerlink_protocol::{PeerId, RoomId};
use tokio::sync::mpsc;

/// A status notification from a transport.
///
/// Delivered on the receiver returned by [`Transport::connect`]. After
/// `Closed` no further events arrive.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The channel is open; payloads can flow.
    Open,
    /// A payload arrived from the remote endpoint.
    Message(String),
    /// A non-fatal transport fault. The channel may still be usable.
    Error(String),
    /// The channel closed, intentionally or not.
    Closed,
}

/// One duplex channel to one remote endpoint.
///
/// The futures returned by these methods are `Send` because channel
/// actors run on the Tokio thread pool.
pub trait Transport: Send + 'static {
    /// Performs the connection handshake and returns the event stream.
    ///
    /// Resolves once negotiation completes; the channel is usable only
    /// after [`TransportEvent::Open`] arrives on the returned receiver.
    /// Negotiation failures are fatal to this call and are never retried
    /// internally; retrying is the caller's (reconnection cycle's) job.
    fn connect(
        &mut self,
    ) -> impl Future<
        Output = Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError>,
    > + Send;

    /// Sends a payload to the remote endpoint.
    ///
    /// If the channel is not open this logs a warning and drops the
    /// payload; it does not return an error. Delivery is ordered with a
    /// bounded retransmission budget, so payloads may also be lost in
    /// flight once the budget is exhausted.
    fn send(&self, payload: &str) -> impl Future<Output = ()> + Send;

    /// Closes the channel and releases its resources.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;
}

/// Produces a fresh [`Transport`] for a room.
///
/// Channels dial through a connector on initial connect and again on
/// every reconnection attempt, so implementations must be reusable.
pub trait Connector: Send + Sync + 'static {
    /// The transport type this connector produces.
    type Transport: Transport;

    /// Creates a transport for `room`, identifying locally as `peer`.
    fn open(
        &self,
        room: &RoomId,
        peer: &PeerId,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}
