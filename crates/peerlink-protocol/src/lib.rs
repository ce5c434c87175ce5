//! Wire protocol for Peerlink.
//!
//! This crate defines the "language" that peers speak over an established
//! channel:
//!
//! - **Types** ([`SystemMessage`], [`UserMessage`], [`Frame`], etc.) —
//!   the message structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`], [`decode_frame`]) — how
//!   those messages are converted to/from text.
//! - **Errors** ([`ProtocolError`]) — what can go wrong during
//!   encoding/decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw text payloads) and the
//! channel (presence state). It doesn't know about connections, rooms, or
//! hosts — it only knows how to serialize and discriminate messages.
//!
//! ```text
//! Transport (text) → Protocol (Frame) → Channel (room state)
//! ```
//!
//! Inbound traffic is deliberately decoded *lossily*: a payload that isn't
//! a recognizable system or user message degrades to [`Frame::Raw`]
//! instead of raising an error, so peers running a newer protocol revision
//! don't break older ones.

mod codec;
mod error;
mod types;

pub use codec::{decode_frame, Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    now_millis, EventPayload, Frame, HostChangePayload, JoinPayload,
    PeerEntry, PeerId, RoomId, RoomStatePayload, SystemAction,
    SystemMessage, SystemTag, UserMessage,
};
