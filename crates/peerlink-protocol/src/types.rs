//! Core wire types for the Peerlink presence protocol.
//!
//! Everything in this module is a structure that gets serialized to JSON
//! text, carried over a negotiated channel, and deserialized on the other
//! side. Two shapes exist on the wire: the **user message** (application
//! traffic) and the **system message** (presence protocol traffic). The
//! receiver discriminates on the `type` tag; see [`crate::decode_frame`].

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Milliseconds since the Unix epoch, as stamped into envelopes and
/// used for peer join times.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a peer.
///
/// Newtype over `String` so a peer id can't be confused with a room id
/// even though both are strings underneath. `#[serde(transparent)]`
/// serializes it as a plain JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Generates a fresh `peer_<8 alphanumeric chars>` identifier.
    pub fn random() -> Self {
        use rand::{distr::Alphanumeric, Rng};
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        Self(format!("peer_{suffix}"))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A unique identifier for a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// System messages
// ---------------------------------------------------------------------------

/// The presence protocol verb carried by a [`SystemMessage`].
///
/// `SCREAMING_SNAKE_CASE` on the wire: `"PEER_JOIN"`, `"ROOM_STATE"`, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemAction {
    /// A peer announces itself to the channel.
    PeerJoin,
    /// A peer announces its departure.
    PeerLeave,
    /// A snapshot of the sender's membership view, sent in reply to a join.
    RoomState,
    /// The sender elected a new host.
    HostChange,
    /// A named application event addressed over this channel.
    Event,
    /// A named application event fanned out to every channel by a manager.
    /// At a single pairwise channel this is indistinguishable from
    /// [`SystemAction::Event`].
    Broadcast,
}

impl fmt::Display for SystemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PeerJoin => "PEER_JOIN",
            Self::PeerLeave => "PEER_LEAVE",
            Self::RoomState => "ROOM_STATE",
            Self::HostChange => "HOST_CHANGE",
            Self::Event => "EVENT",
            Self::Broadcast => "BROADCAST",
        };
        write!(f, "{s}")
    }
}

/// The constant `type` discriminator of a system message.
///
/// Serializing always produces `"SYSTEM"`; deserializing anything else
/// fails, which is what lets [`crate::decode_frame`] tell system traffic
/// apart from user traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SystemTag {
    #[default]
    #[serde(rename = "SYSTEM")]
    System,
}

/// A presence protocol message.
///
/// Wire shape:
///
/// ```json
/// {
///   "type": "SYSTEM",
///   "action": "PEER_JOIN",
///   "payload": { "metadata": { "name": "alice" } },
///   "peer_id": "peer_ab12cd34",
///   "target": null,
///   "timestamp": 1724792400000
/// }
/// ```
///
/// `payload` is opaque at this level; each action has a typed payload
/// struct with an accessor below. `target` addresses a message to one
/// peer; receivers ignore system messages targeted at someone else.
/// Envelopes are transient: constructed, sent, and discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    #[serde(rename = "type")]
    pub tag: SystemTag,
    pub action: SystemAction,
    #[serde(default)]
    pub payload: Value,
    pub peer_id: PeerId,
    #[serde(default)]
    pub target: Option<PeerId>,
    pub timestamp: u64,
}

impl SystemMessage {
    fn new(
        action: SystemAction,
        peer_id: &PeerId,
        payload: Value,
        target: Option<&PeerId>,
    ) -> Self {
        Self {
            tag: SystemTag::System,
            action,
            payload,
            peer_id: peer_id.clone(),
            target: target.cloned(),
            timestamp: now_millis(),
        }
    }

    /// Builds a `PEER_JOIN` announcement carrying the sender's metadata.
    pub fn join(peer_id: &PeerId, metadata: Value) -> Self {
        Self::new(
            SystemAction::PeerJoin,
            peer_id,
            to_payload(&JoinPayload { metadata }),
            None,
        )
    }

    /// Builds a `PEER_LEAVE` announcement.
    pub fn leave(peer_id: &PeerId) -> Self {
        Self::new(SystemAction::PeerLeave, peer_id, Value::Null, None)
    }

    /// Builds a `ROOM_STATE` snapshot addressed to one peer.
    pub fn room_state(
        peer_id: &PeerId,
        payload: &RoomStatePayload,
        target: &PeerId,
    ) -> Self {
        Self::new(
            SystemAction::RoomState,
            peer_id,
            to_payload(payload),
            Some(target),
        )
    }

    /// Builds a `HOST_CHANGE` announcement.
    pub fn host_change(peer_id: &PeerId, host_id: &PeerId) -> Self {
        Self::new(
            SystemAction::HostChange,
            peer_id,
            to_payload(&HostChangePayload {
                host_id: host_id.clone(),
            }),
            None,
        )
    }

    /// Builds an `EVENT` message carrying a named application event.
    pub fn event(peer_id: &PeerId, event: &str, data: Value) -> Self {
        Self::new(
            SystemAction::Event,
            peer_id,
            to_payload(&EventPayload {
                event: event.to_string(),
                data,
            }),
            None,
        )
    }

    /// Builds a `BROADCAST` message carrying a named application event.
    pub fn broadcast(peer_id: &PeerId, event: &str, data: Value) -> Self {
        Self::new(
            SystemAction::Broadcast,
            peer_id,
            to_payload(&EventPayload {
                event: event.to_string(),
                data,
            }),
            None,
        )
    }

    /// Parses the payload as a [`JoinPayload`].
    pub fn join_payload(&self) -> Result<JoinPayload, crate::ProtocolError> {
        from_payload(&self.payload)
    }

    /// Parses the payload as a [`RoomStatePayload`].
    pub fn room_state_payload(
        &self,
    ) -> Result<RoomStatePayload, crate::ProtocolError> {
        from_payload(&self.payload)
    }

    /// Parses the payload as a [`HostChangePayload`].
    pub fn host_change_payload(
        &self,
    ) -> Result<HostChangePayload, crate::ProtocolError> {
        from_payload(&self.payload)
    }

    /// Parses the payload as an [`EventPayload`].
    pub fn event_payload(&self) -> Result<EventPayload, crate::ProtocolError> {
        from_payload(&self.payload)
    }
}

/// Serializes a typed payload into the opaque `payload` field.
///
/// The payload structs contain only strings, integers, and already-valid
/// JSON values, so serialization cannot fail in practice.
fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn from_payload<T: serde::de::DeserializeOwned>(
    payload: &Value,
) -> Result<T, crate::ProtocolError> {
    serde_json::from_value(payload.clone()).map_err(crate::ProtocolError::Decode)
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

/// Payload of a `PEER_JOIN`: arbitrary metadata the peer wants to share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPayload {
    #[serde(default)]
    pub metadata: Value,
}

/// One peer inside a `ROOM_STATE` payload.
///
/// Carries the sender's observed `join_time` so receivers can merge
/// membership views and elect the same host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub id: PeerId,
    pub join_time: u64,
    #[serde(default)]
    pub metadata: Value,
}

/// Payload of a `ROOM_STATE`: the sender's full membership view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomStatePayload {
    pub peers: Vec<PeerEntry>,
    #[serde(default)]
    pub host_id: Option<PeerId>,
}

/// Payload of a `HOST_CHANGE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostChangePayload {
    pub host_id: PeerId,
}

/// Payload of an `EVENT` or `BROADCAST`: a named event plus arbitrary data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

// ---------------------------------------------------------------------------
// User messages and inbound frames
// ---------------------------------------------------------------------------

/// An application message: `{ "peer_id": ..., "message": ... }`.
///
/// `message` is arbitrary JSON, opaque to the protocol layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub peer_id: PeerId,
    #[serde(default)]
    pub message: Value,
}

/// A decoded inbound payload.
///
/// Produced by [`crate::decode_frame`]. `Raw` is the graceful-degradation
/// arm: anything that doesn't parse as one of the two wire shapes is
/// delivered verbatim rather than dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    System(SystemMessage),
    User(UserMessage),
    Raw(String),
}

// =========================================================================
// Tests
// =========================================================================
