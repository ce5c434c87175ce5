//! Channel configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a room channel.
///
/// The defaults match the reference deployment: three reconnection
/// attempts spaced a flat two seconds apart, and a generous negotiation
/// bound for slow relays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Maximum reconnection attempts after an unexpected disconnect.
    /// `0` disables reconnection entirely.
    pub max_reconnect_attempts: u32,

    /// Flat delay before each reconnection attempt. There is no backoff;
    /// every attempt waits the same amount.
    pub reconnect_delay: Duration,

    /// How long a single connection attempt may spend negotiating before
    /// it is abandoned.
    pub negotiation_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(2000),
            negotiation_timeout: Duration::from_secs(30),
        }
    }
}
