//! Room manager: opens, tracks, and routes messages to room channels.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use peerlink_channel::{
    open_channel, ChannelConfig, ChannelEvent, ChannelHandle, ChannelState,
    ChannelStatus,
};
use peerlink_protocol::{
    Codec, JsonCodec, PeerEntry, PeerId, RoomId, SystemMessage, UserMessage,
};
use peerlink_transport::Connector;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::{HandlerId, ListenerRegistry, Notification, PeerlinkError};

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

type JoinHook = Arc<dyn Fn(&RoomId, &PeerId, &Value) + Send + Sync>;
type LeaveHook = Arc<dyn Fn(&RoomId, &PeerId) + Send + Sync>;
type HostHook = Arc<dyn Fn(&RoomId, Option<&PeerId>, bool) + Send + Sync>;
type RoomHook = Arc<dyn Fn(&RoomId, &[PeerEntry]) + Send + Sync>;
type StateHook = Arc<dyn Fn(&RoomId, ChannelState) + Send + Sync>;
type RawHook = Arc<dyn Fn(&RoomId, &str) + Send + Sync>;

/// Direct presence callbacks, for callers that want typed notifications
/// without going through the named-event registry.
#[derive(Default, Clone)]
pub struct PresenceHooks {
    peer_joined: Option<JoinHook>,
    peer_left: Option<LeaveHook>,
    host_changed: Option<HostHook>,
    room_updated: Option<RoomHook>,
    state_changed: Option<StateHook>,
    raw: Option<RawHook>,
}

impl PresenceHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_peer_joined(
        mut self,
        f: impl Fn(&RoomId, &PeerId, &Value) + Send + Sync + 'static,
    ) -> Self {
        self.peer_joined = Some(Arc::new(f));
        self
    }

    pub fn on_peer_left(
        mut self,
        f: impl Fn(&RoomId, &PeerId) + Send + Sync + 'static,
    ) -> Self {
        self.peer_left = Some(Arc::new(f));
        self
    }

    pub fn on_host_changed(
        mut self,
        f: impl Fn(&RoomId, Option<&PeerId>, bool) + Send + Sync + 'static,
    ) -> Self {
        self.host_changed = Some(Arc::new(f));
        self
    }

    /// Called with the full roster after each reconciliation.
    pub fn on_room_updated(
        mut self,
        f: impl Fn(&RoomId, &[PeerEntry]) + Send + Sync + 'static,
    ) -> Self {
        self.room_updated = Some(Arc::new(f));
        self
    }

    pub fn on_state_changed(
        mut self,
        f: impl Fn(&RoomId, ChannelState) + Send + Sync + 'static,
    ) -> Self {
        self.state_changed = Some(Arc::new(f));
        self
    }

    /// Called with text that wasn't a recognizable protocol message.
    pub fn on_raw(
        mut self,
        f: impl Fn(&RoomId, &str) + Send + Sync + 'static,
    ) -> Self {
        self.raw = Some(Arc::new(f));
        self
    }
}

// ---------------------------------------------------------------------------
// Join outcomes
// ---------------------------------------------------------------------------

/// Result of one room in a batch join.
#[derive(Debug)]
pub struct JoinOutcome {
    pub room: RoomId,
    pub result: Result<(), PeerlinkError>,
}

impl JoinOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Manages one peer identity across any number of room channels.
///
/// All methods take `&self`; a manager is usually wrapped in an [`Arc`]
/// and shared. Each joined room runs as its own channel actor plus a
/// dispatch task that feeds the listener registry and hooks, so a slow
/// handler in one room never stalls another room's traffic.
pub struct RoomManager<C: Connector> {
    connector: Arc<C>,
    peer_id: PeerId,
    metadata: Value,
    config: ChannelConfig,
    codec: JsonCodec,
    registry: Arc<ListenerRegistry>,
    hooks: Arc<Mutex<PresenceHooks>>,
    channels: Arc<Mutex<HashMap<RoomId, ChannelHandle>>>,
}

impl<C: Connector> RoomManager<C> {
    /// Creates a manager with a freshly generated peer id.
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            peer_id: PeerId::random(),
            metadata: Value::Null,
            config: ChannelConfig::default(),
            codec: JsonCodec,
            registry: Arc::new(ListenerRegistry::new()),
            hooks: Arc::new(Mutex::new(PresenceHooks::default())),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Overrides the generated peer id.
    pub fn with_peer_id(mut self, peer_id: impl Into<PeerId>) -> Self {
        self.peer_id = peer_id.into();
        self
    }

    /// Metadata announced alongside every join.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// The identity this manager joins rooms as.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Replaces the presence hooks. Applies to all rooms, including ones
    /// already joined.
    pub fn set_hooks(&self, hooks: PresenceHooks) {
        *self.hooks.lock().expect("hooks poisoned") = hooks;
    }

    // -- membership ---------------------------------------------------------

    /// Opens a channel into `room`.
    pub async fn join_room(
        &self,
        room: impl Into<RoomId>,
    ) -> Result<(), PeerlinkError> {
        let room = room.into();
        if self.is_joined(&room) {
            return Err(PeerlinkError::AlreadyJoined(room));
        }

        let (handle, events) = open_channel(
            Arc::clone(&self.connector),
            room.clone(),
            self.peer_id.clone(),
            self.metadata.clone(),
            self.config.clone(),
        )
        .await?;

        let stored = {
            let mut channels =
                self.channels.lock().expect("channels poisoned");
            match channels.entry(room.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(handle.clone());
                    true
                }
                Entry::Occupied(_) => false,
            }
        };
        if !stored {
            // Lost a join race for the same room.
            handle.close().await;
            return Err(PeerlinkError::AlreadyJoined(room));
        }
        tracing::info!(%room, peer = %self.peer_id, "joined room");
        self.spawn_dispatch(room, events);
        Ok(())
    }

    /// Joins several rooms, tolerating partial failure: one room
    /// refusing to connect doesn't abort the rest. The outcomes are in
    /// input order.
    pub async fn join_rooms(
        &self,
        rooms: impl IntoIterator<Item = impl Into<RoomId>>,
    ) -> Vec<JoinOutcome> {
        let mut outcomes = Vec::new();
        for room in rooms {
            let room = room.into();
            let result = self.join_room(room.clone()).await;
            if let Err(e) = &result {
                tracing::warn!(%room, error = %e, "join failed");
            }
            outcomes.push(JoinOutcome { room, result });
        }
        outcomes
    }

    /// Leaves `room`, announcing the departure.
    pub async fn leave_room(
        &self,
        room: &RoomId,
    ) -> Result<(), PeerlinkError> {
        let handle = self
            .channels
            .lock()
            .expect("channels poisoned")
            .remove(room)
            .ok_or_else(|| PeerlinkError::NotJoined(room.clone()))?;
        handle.close().await;
        tracing::info!(%room, peer = %self.peer_id, "left room");
        Ok(())
    }

    /// Leaves every joined room.
    pub async fn leave_all_rooms(&self) {
        let handles: Vec<(RoomId, ChannelHandle)> = self
            .channels
            .lock()
            .expect("channels poisoned")
            .drain()
            .collect();
        for (room, handle) in handles {
            handle.close().await;
            tracing::info!(%room, "left room");
        }
    }

    pub fn is_joined(&self, room: &RoomId) -> bool {
        self.channels
            .lock()
            .expect("channels poisoned")
            .contains_key(room)
    }

    /// The rooms with a live channel.
    pub fn rooms(&self) -> Vec<RoomId> {
        self.channels
            .lock()
            .expect("channels poisoned")
            .keys()
            .cloned()
            .collect()
    }

    // -- sending ------------------------------------------------------------

    /// Sends a named application event into one room. Returns `true` if
    /// the room's channel was open and accepted the payload.
    pub async fn emit(
        &self,
        room: &RoomId,
        event: &str,
        data: Value,
    ) -> bool {
        let Some(handle) = self.handle_for(room) else {
            tracing::warn!(%room, "emit into unjoined room");
            return false;
        };
        let msg = SystemMessage::event(&self.peer_id, event, data);
        self.send_encoded(&handle, &msg).await
    }

    /// Sends a plain text message into one room.
    pub async fn send_message(&self, room: &RoomId, text: &str) -> bool {
        let Some(handle) = self.handle_for(room) else {
            tracing::warn!(%room, "message into unjoined room");
            return false;
        };
        let msg = UserMessage {
            peer_id: self.peer_id.clone(),
            message: Value::String(text.to_string()),
        };
        self.send_encoded(&handle, &msg).await
    }

    /// Broadcasts a named event into every joined room. Returns how many
    /// rooms accepted it; rooms whose channel is reconnecting or closed
    /// are skipped, not errors.
    pub async fn broadcast_to_all(&self, event: &str, data: Value) -> usize {
        let handles: Vec<(RoomId, ChannelHandle)> = {
            let channels =
                self.channels.lock().expect("channels poisoned");
            channels
                .iter()
                .map(|(room, handle)| (room.clone(), handle.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (room, handle) in handles {
            let msg =
                SystemMessage::broadcast(&self.peer_id, event, data.clone());
            if self.send_encoded(&handle, &msg).await {
                delivered += 1;
            } else {
                tracing::debug!(%room, "broadcast skipped closed channel");
            }
        }
        delivered
    }

    // -- observation --------------------------------------------------------

    /// A status snapshot per joined room. Rooms whose actor is gone are
    /// omitted.
    pub async fn status(&self) -> HashMap<RoomId, ChannelStatus> {
        let handles: Vec<(RoomId, ChannelHandle)> = {
            let channels =
                self.channels.lock().expect("channels poisoned");
            channels
                .iter()
                .map(|(room, handle)| (room.clone(), handle.clone()))
                .collect()
        };
        let mut statuses = HashMap::new();
        for (room, handle) in handles {
            if let Ok(status) = handle.status().await {
                statuses.insert(room, status);
            }
        }
        statuses
    }

    /// Registers a handler for `event` in every room.
    pub fn on(
        &self,
        event: impl Into<String>,
        listener: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> HandlerId {
        self.registry.on(event, listener)
    }

    /// Registers a handler for `event` in one room.
    pub fn on_room(
        &self,
        room: impl Into<RoomId>,
        event: impl Into<String>,
        listener: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> HandlerId {
        self.registry.on_room(room.into(), event, listener)
    }

    /// Removes a handler registered with [`on`](Self::on) or
    /// [`on_room`](Self::on_room).
    pub fn off(&self, id: HandlerId) -> bool {
        self.registry.off(id)
    }

    // -- internals ----------------------------------------------------------

    fn handle_for(&self, room: &RoomId) -> Option<ChannelHandle> {
        self.channels
            .lock()
            .expect("channels poisoned")
            .get(room)
            .cloned()
    }

    async fn send_encoded<T: serde::Serialize>(
        &self,
        handle: &ChannelHandle,
        msg: &T,
    ) -> bool {
        match self.codec.encode(msg) {
            Ok(text) => handle.send(text).await,
            Err(e) => {
                tracing::warn!(error = %e, "encode failed");
                false
            }
        }
    }

    /// Pumps one channel's events into the registry and hooks.
    fn spawn_dispatch(
        &self,
        room: RoomId,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        let registry = Arc::clone(&self.registry);
        let hooks = Arc::clone(&self.hooks);
        let channels = Arc::clone(&self.channels);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                dispatch_event(&room, event, &registry, &hooks, &channels);
            }
            tracing::debug!(%room, "dispatch task ended");
        });
    }
}

/// Routes one channel event to the hooks and the listener registry.
fn dispatch_event(
    room: &RoomId,
    event: ChannelEvent,
    registry: &ListenerRegistry,
    hooks: &Mutex<PresenceHooks>,
    channels: &Mutex<HashMap<RoomId, ChannelHandle>>,
) {
    // Hooks are cloned out so a handler can call `set_hooks` without
    // deadlocking.
    let hooks = hooks.lock().expect("hooks poisoned").clone();

    let notify = |event: String, peer: Option<PeerId>, data: Value| {
        registry.dispatch(&Notification {
            room: room.clone(),
            event,
            peer,
            data,
        });
    };

    match event {
        ChannelEvent::PeerJoined { peer, metadata } => {
            if let Some(hook) = &hooks.peer_joined {
                hook(room, &peer, &metadata);
            }
            notify("peer_joined".into(), Some(peer), metadata);
        }
        ChannelEvent::PeerLeft { peer } => {
            if let Some(hook) = &hooks.peer_left {
                hook(room, &peer);
            }
            notify("peer_left".into(), Some(peer), Value::Null);
        }
        ChannelEvent::HostChanged { host, is_local } => {
            if let Some(hook) = &hooks.host_changed {
                hook(room, host.as_ref(), is_local);
            }
            let data = json!({ "host_id": host.clone(), "is_local": is_local });
            notify("host_changed".into(), host, data);
        }
        ChannelEvent::RoomState { peers } => {
            if let Some(hook) = &hooks.room_updated {
                hook(room, &peers);
            }
            let data = serde_json::to_value(&peers).unwrap_or(Value::Null);
            notify("room_state".into(), None, data);
        }
        ChannelEvent::Message { peer, text } => {
            notify("message".into(), Some(peer), text);
        }
        // Named events and broadcasts dispatch under their own name, so
        // `on("cursor", ..)` pairs with `emit(room, "cursor", ..)`.
        ChannelEvent::Event { peer, event, data } => {
            notify(event.unwrap_or_else(|| "event".into()), Some(peer), data);
        }
        ChannelEvent::Broadcast { peer, event, data } => {
            notify(
                event.unwrap_or_else(|| "broadcast".into()),
                Some(peer),
                data,
            );
        }
        ChannelEvent::Raw(text) => {
            if let Some(hook) = &hooks.raw {
                hook(room, &text);
            }
            notify("raw".into(), None, Value::String(text));
        }
        ChannelEvent::StateChanged(state) => {
            if let Some(hook) = &hooks.state_changed {
                hook(room, state);
            }
            if state == ChannelState::Closed {
                channels
                    .lock()
                    .expect("channels poisoned")
                    .remove(room);
            }
        }
        ChannelEvent::ReconnectionExhausted { attempts } => {
            tracing::error!(%room, attempts, "room connection abandoned");
            notify(
                "reconnection_exhausted".into(),
                None,
                json!({ "attempts": attempts }),
            );
        }
    }
}
