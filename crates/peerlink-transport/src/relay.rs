//! The relay surface: three remote calls that ferry negotiation payloads
//! between two peers that cannot reach each other yet.
//!
//! The relay retains no connection state after introduction; it only
//! forwards an offer to the room, returns the answer, accepts candidate
//! hints, and records departures.

use std::future::Future;

use peerlink_protocol::{PeerId, RoomId};
use serde_json::Value;

use crate::TransportError;

/// Client for the transport-negotiation relay.
pub trait RelayClient: Send + Sync + 'static {
    /// Submits an offer for `room` and returns the remote answer.
    fn submit_offer(
        &self,
        room: &RoomId,
        peer: &PeerId,
        offer: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;

    /// Submits a locally discovered candidate hint.
    ///
    /// Callers treat failures as non-fatal; hints are opportunistic.
    fn submit_candidate(
        &self,
        room: &RoomId,
        peer: &PeerId,
        candidate: Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Announces that `peer` is leaving `room`.
    fn announce_leave(
        &self,
        room: &RoomId,
        peer: &PeerId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// [`RelayClient`] over HTTP.
///
/// Speaks the relay's three POST endpoints:
///
/// - `POST /offer` with `{room, peer_id, offer}`, reply `{answer}`
/// - `POST /candidate` with `{room, peer_id, candidate}`
/// - `POST /leave` with `{room, peer_id}`
#[cfg(feature = "http-relay")]
pub struct HttpRelay {
    base_url: String,
    http: reqwest::Client,
}

#[cfg(feature = "http-relay")]
impl HttpRelay {
    /// Creates a relay client for the given base URL
    /// (e.g. `https://relay.example.com`). A trailing slash is stripped.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// The relay base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(
        &self,
        endpoint: &str,
        body: Value,
    ) -> Result<Value, TransportError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Relay(e.to_string()))?
            .error_for_status()
            .map_err(|e| TransportError::Relay(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| TransportError::Relay(e.to_string()))
    }
}

#[cfg(feature = "http-relay")]
impl RelayClient for HttpRelay {
    async fn submit_offer(
        &self,
        room: &RoomId,
        peer: &PeerId,
        offer: Value,
    ) -> Result<Value, TransportError> {
        let reply = self
            .post(
                "offer",
                serde_json::json!({
                    "room": room,
                    "peer_id": peer,
                    "offer": offer,
                }),
            )
            .await?;
        reply.get("answer").cloned().ok_or_else(|| {
            TransportError::Negotiation("relay reply missing answer".into())
        })
    }

    async fn submit_candidate(
        &self,
        room: &RoomId,
        peer: &PeerId,
        candidate: Value,
    ) -> Result<(), TransportError> {
        self.post(
            "candidate",
            serde_json::json!({
                "room": room,
                "peer_id": peer,
                "candidate": candidate,
            }),
        )
        .await?;
        Ok(())
    }

    async fn announce_leave(
        &self,
        room: &RoomId,
        peer: &PeerId,
    ) -> Result<(), TransportError> {
        self.post(
            "leave",
            serde_json::json!({
                "room": room,
                "peer_id": peer,
            }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(all(test, feature = "http-relay"))]
mod tests {
    use super::*;

    #[test]
    fn test_http_relay_strips_trailing_slashes() {
        let relay = HttpRelay::new("https://relay.example.com///");
        assert_eq!(relay.base_url(), "https://relay.example.com");
    }

    #[test]
    fn test_http_relay_keeps_clean_url() {
        let relay = HttpRelay::new("http://127.0.0.1:5000");
        assert_eq!(relay.base_url(), "http://127.0.0.1:5000");
    }
}
