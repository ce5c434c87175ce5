//! Error types for the transport layer.

use std::time::Duration;

/// Errors that can occur while establishing or using a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The negotiation handshake failed or produced a structurally
    /// invalid answer. Fatal to the `connect()` attempt that raised it.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// A relay call (`submit_offer`, `submit_candidate`,
    /// `announce_leave`) failed.
    #[error("relay request failed: {0}")]
    Relay(String),

    /// Dialing the remote endpoint failed before negotiation started.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Negotiation did not complete within the configured bound.
    #[error("negotiation timed out after {0:?}")]
    Timeout(Duration),

    /// The transport closed before the channel became usable.
    #[error("transport closed")]
    Closed,
}
