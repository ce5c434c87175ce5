//! The presence protocol.
//!
//! [`PresenceEngine`] is a pure state machine: it consumes decoded
//! frames and channel lifecycle notifications, mutates the local roster,
//! and returns [`Effect`]s describing what should happen next. The
//! channel actor owns the side effects (sending on the transport,
//! surfacing application events), which keeps every protocol rule
//! testable without a transport.

use peerlink_protocol::{
    now_millis, Frame, PeerId, RoomStatePayload, SystemAction, SystemMessage,
};
use serde_json::Value;

use crate::{ChannelEvent, ElectionStrategy, PeerRecord, RoomState};

/// A side effect requested by the presence engine.
#[derive(Debug)]
pub enum Effect {
    /// Send a presence message on the channel.
    Send(SystemMessage),
    /// Surface an event to the application.
    App(ChannelEvent),
}

/// Drives the presence rules for one channel.
pub struct PresenceEngine {
    state: RoomState,
    metadata: Value,
    election: Box<dyn ElectionStrategy>,
}

impl PresenceEngine {
    pub fn new(
        local: PeerId,
        metadata: Value,
        election: Box<dyn ElectionStrategy>,
    ) -> Self {
        Self {
            state: RoomState::new(local),
            metadata,
            election,
        }
    }

    /// The current roster view.
    pub fn state(&self) -> &RoomState {
        &self.state
    }

    /// Starts a fresh presence session after the channel opens.
    ///
    /// Any roster carried over from before a reconnect is discarded; the
    /// join announcement makes the remote side re-introduce everyone.
    pub fn on_open(&mut self) -> Vec<Effect> {
        self.state.clear();
        self.state.insert_local(self.metadata.clone());

        let local = self.state.local().clone();
        let mut effects =
            vec![Effect::Send(SystemMessage::join(&local, self.metadata.clone()))];
        // Alone in the room the local peer hosts; announcing it to an
        // empty room would be pointless.
        effects.extend(self.reelect(false));
        effects
    }

    /// Applies one inbound frame and returns the resulting effects.
    pub fn on_frame(&mut self, frame: Frame) -> Vec<Effect> {
        match frame {
            Frame::System(msg) => self.on_system(msg),
            Frame::User(user) => {
                if user.peer_id == *self.state.local() {
                    return Vec::new();
                }
                self.state.touch(&user.peer_id, now_millis());
                vec![Effect::App(ChannelEvent::Message {
                    peer: user.peer_id,
                    text: user.message,
                })]
            }
            Frame::Raw(text) => vec![Effect::App(ChannelEvent::Raw(text))],
        }
    }

    /// Effects to run just before an intentional close.
    pub fn on_local_leave(&self) -> Vec<Effect> {
        vec![Effect::Send(SystemMessage::leave(self.state.local()))]
    }

    fn on_system(&mut self, msg: SystemMessage) -> Vec<Effect> {
        // Echoes of our own messages carry no new information.
        if msg.peer_id == *self.state.local() {
            return Vec::new();
        }
        // Targeted messages for someone else are not ours to act on.
        if let Some(target) = &msg.target {
            if target != self.state.local() {
                return Vec::new();
            }
        }
        self.state.touch(&msg.peer_id, msg.timestamp);

        match msg.action {
            SystemAction::PeerJoin => self.on_peer_join(msg),
            SystemAction::PeerLeave => self.on_peer_leave(msg),
            SystemAction::RoomState => self.on_room_state(msg),
            SystemAction::HostChange => self.on_host_change(msg),
            SystemAction::Event => {
                vec![Effect::App(Self::event_from(&msg, ChannelEvent::event))]
            }
            SystemAction::Broadcast => {
                vec![Effect::App(Self::event_from(&msg, ChannelEvent::broadcast))]
            }
        }
    }

    fn on_peer_join(&mut self, msg: SystemMessage) -> Vec<Effect> {
        let metadata = msg
            .join_payload()
            .map(|p| p.metadata)
            .unwrap_or(Value::Null);
        let peer = msg.peer_id;
        let is_new =
            self.state
                .insert_peer(peer.clone(), now_millis(), metadata.clone());

        let mut effects = Vec::new();
        if is_new {
            effects.push(Effect::App(ChannelEvent::PeerJoined {
                peer: peer.clone(),
                metadata,
            }));
        }
        // Introduce the room to the newcomer so its roster catches up.
        let snapshot = RoomStatePayload {
            peers: self.state.snapshot(),
            host_id: self.state.host_id().cloned(),
        };
        effects.push(Effect::Send(SystemMessage::room_state(
            self.state.local(),
            &snapshot,
            &peer,
        )));
        effects.extend(self.reelect(true));
        effects
    }

    fn on_peer_leave(&mut self, msg: SystemMessage) -> Vec<Effect> {
        if !self.state.remove_peer(&msg.peer_id) {
            return Vec::new();
        }
        let mut effects =
            vec![Effect::App(ChannelEvent::PeerLeft { peer: msg.peer_id })];
        effects.extend(self.reelect(true));
        effects
    }

    fn on_room_state(&mut self, msg: SystemMessage) -> Vec<Effect> {
        let payload = match msg.room_state_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(peer = %msg.peer_id, error = %e, "bad roster announcement");
                return Vec::new();
            }
        };
        self.state.merge(&payload.peers);
        let mut effects = vec![Effect::App(ChannelEvent::RoomState {
            peers: self.state.snapshot(),
        })];
        effects.extend(self.reelect(true));
        effects
    }

    /// A host announcement is a hint, not an order: the local election
    /// over the local roster decides, which keeps a stale or malicious
    /// announcement from splitting the room.
    fn on_host_change(&mut self, _msg: SystemMessage) -> Vec<Effect> {
        self.reelect(false)
    }

    fn event_from(
        msg: &SystemMessage,
        make: fn(PeerId, Option<String>, Value) -> ChannelEvent,
    ) -> ChannelEvent {
        match msg.event_payload() {
            Ok(payload) => {
                make(msg.peer_id.clone(), Some(payload.event), payload.data)
            }
            // Malformed payloads still reach the application, just
            // without an event name.
            Err(_) => make(msg.peer_id.clone(), None, msg.payload.clone()),
        }
    }

    /// Re-runs the election and reports a host change.
    ///
    /// With `announce` set, a newly elected local host broadcasts the
    /// change; remote hosts never announce on our behalf.
    fn reelect(&mut self, announce: bool) -> Vec<Effect> {
        let records: Vec<&PeerRecord> = self.state.records().collect();
        let host = self.election.elect(&records);

        if !self.state.set_host(host.clone()) {
            return Vec::new();
        }
        let is_local = self.state.is_host();
        let mut effects = vec![Effect::App(ChannelEvent::HostChanged {
            host: host.clone(),
            is_local,
        })];
        if announce && is_local {
            if let Some(host) = &host {
                effects.push(Effect::Send(SystemMessage::host_change(
                    self.state.local(),
                    host,
                )));
            }
        }
        effects
    }
}
