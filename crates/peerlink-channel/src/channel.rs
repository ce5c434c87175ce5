//! Channel actor: an isolated Tokio task that owns one room connection.
//!
//! Each open channel runs in its own task. The task owns the transport,
//! the presence engine, and the reconnection cycle; the outside world
//! talks to it through an mpsc command channel and observes it through
//! an event receiver plus a `watch` on the lifecycle state.

use std::sync::Arc;

use peerlink_protocol::{
    decode_frame, Codec, JsonCodec, PeerEntry, PeerId, RoomId,
};
use peerlink_transport::{Connector, Transport, TransportError, TransportEvent};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    ChannelConfig, ChannelError, Effect, ElectionStrategy, OldestPeer,
    PresenceEngine,
};

// ---------------------------------------------------------------------------
// Lifecycle state
// ---------------------------------------------------------------------------

/// The lifecycle state of a channel.
///
/// ```text
/// Idle → Connecting → Open ⇄ Reconnecting
///                       │         │
///                       └──→ Closed ←┘
/// ```
///
/// `Closed` is terminal: a channel that reaches it is never reused, a
/// fresh one must be opened instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl ChannelState {
    /// Returns `true` if payloads can currently be sent.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Events and status
// ---------------------------------------------------------------------------

/// An event surfaced to the application by a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The lifecycle state changed.
    StateChanged(ChannelState),
    /// A remote peer joined the room.
    PeerJoined { peer: PeerId, metadata: Value },
    /// A remote peer left the room.
    PeerLeft { peer: PeerId },
    /// The host election produced a new result.
    HostChanged {
        host: Option<PeerId>,
        /// Whether the local peer is the new host.
        is_local: bool,
    },
    /// The roster was reconciled against a remote announcement.
    RoomState { peers: Vec<PeerEntry> },
    /// A user message from a remote peer. `text` is arbitrary JSON,
    /// opaque to the presence protocol.
    Message { peer: PeerId, text: Value },
    /// A named application event from a remote peer. `event` is `None`
    /// when the payload didn't carry a recognizable name.
    Event {
        peer: PeerId,
        event: Option<String>,
        data: Value,
    },
    /// A room-wide broadcast from a remote peer.
    Broadcast {
        peer: PeerId,
        event: Option<String>,
        data: Value,
    },
    /// Text that wasn't a recognizable protocol message.
    Raw(String),
    /// Every reconnection attempt failed; the channel is closing.
    ReconnectionExhausted { attempts: u32 },
}

impl ChannelEvent {
    pub(crate) fn event(
        peer: PeerId,
        event: Option<String>,
        data: Value,
    ) -> Self {
        Self::Event { peer, event, data }
    }

    pub(crate) fn broadcast(
        peer: PeerId,
        event: Option<String>,
        data: Value,
    ) -> Self {
        Self::Broadcast { peer, event, data }
    }
}

/// A snapshot of one channel's state, as reported by [`ChannelHandle::status`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStatus {
    pub room: RoomId,
    pub peer: PeerId,
    pub state: ChannelState,
    pub peer_count: usize,
    pub host_id: Option<PeerId>,
    pub is_host: bool,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Commands sent to a channel actor through its channel.
enum ChannelCommand {
    Send {
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<ChannelStatus>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running channel actor. Cheap to clone.
#[derive(Clone)]
pub struct ChannelHandle {
    room: RoomId,
    peer: PeerId,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    state: watch::Receiver<ChannelState>,
}

impl ChannelHandle {
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// A watch receiver over the lifecycle state, for callers that want
    /// to await transitions instead of polling.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Sends raw text on the channel. Returns `true` if the channel was
    /// open and the payload was handed to the transport.
    pub async fn send(&self, text: impl Into<String>) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(ChannelCommand::Send {
                text: text.into(),
                reply: reply_tx,
            })
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Requests a status snapshot.
    pub async fn status(&self) -> Result<ChannelStatus, ChannelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(ChannelCommand::Status { reply: reply_tx })
            .map_err(|_| {
                ChannelError::Unavailable(format!("room {}", self.room))
            })?;
        reply_rx.await.map_err(|_| {
            ChannelError::Unavailable(format!("room {}", self.room))
        })
    }

    /// Closes the channel, announcing the departure first. Idempotent;
    /// closing an already closed channel is a no-op.
    pub async fn close(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(ChannelCommand::Close { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Opening
// ---------------------------------------------------------------------------

/// Opens a channel into `room` with the default host election.
///
/// Resolves once the transport is negotiated and open; the join
/// announcement has already been sent when events start flowing. Errors
/// here are initial-connection errors; reconnection only applies to
/// channels that were open at least once.
pub async fn open_channel<C: Connector>(
    connector: Arc<C>,
    room: RoomId,
    peer: PeerId,
    metadata: Value,
    config: ChannelConfig,
) -> Result<(ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>), ChannelError>
{
    open_channel_with(connector, room, peer, metadata, config, Box::new(OldestPeer))
        .await
}

/// Opens a channel with a caller-provided election strategy.
pub async fn open_channel_with<C: Connector>(
    connector: Arc<C>,
    room: RoomId,
    peer: PeerId,
    metadata: Value,
    config: ChannelConfig,
    election: Box<dyn ElectionStrategy>,
) -> Result<(ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>), ChannelError>
{
    let (transport, transport_rx) =
        establish(connector.as_ref(), &room, &peer, &config).await?;

    let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let actor = ChannelActor {
        room: room.clone(),
        peer: peer.clone(),
        config,
        connector,
        codec: JsonCodec,
        presence: PresenceEngine::new(peer.clone(), metadata, election),
        transport,
        transport_rx,
        cmd_rx,
        state: state_tx,
        events: event_tx,
    };
    tokio::spawn(actor.run());

    Ok((
        ChannelHandle {
            room,
            peer,
            commands: cmd_tx,
            state: state_rx,
        },
        event_rx,
    ))
}

/// Dials the connector and waits for the transport to report open,
/// bounded by the negotiation timeout.
async fn establish<C: Connector>(
    connector: &C,
    room: &RoomId,
    peer: &PeerId,
    config: &ChannelConfig,
) -> Result<
    (C::Transport, mpsc::UnboundedReceiver<TransportEvent>),
    ChannelError,
> {
    let mut transport = connector.open(room, peer).await?;
    let until_open = async {
        let mut rx = transport.connect().await?;
        loop {
            match rx.recv().await {
                Some(TransportEvent::Open) => return Ok(rx),
                Some(TransportEvent::Error(e)) => {
                    tracing::debug!(%room, error = %e, "fault while negotiating");
                }
                Some(TransportEvent::Message(_)) => {
                    // Nothing protocol-relevant can arrive before open.
                }
                Some(TransportEvent::Closed) | None => {
                    return Err(TransportError::Closed);
                }
            }
        }
    };
    let rx = tokio::time::timeout(config.negotiation_timeout, until_open)
        .await
        .map_err(|_| TransportError::Timeout(config.negotiation_timeout))??;
    Ok((transport, rx))
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct ChannelActor<C: Connector> {
    room: RoomId,
    peer: PeerId,
    config: ChannelConfig,
    connector: Arc<C>,
    codec: JsonCodec,
    presence: PresenceEngine,
    transport: C::Transport,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    cmd_rx: mpsc::UnboundedReceiver<ChannelCommand>,
    state: watch::Sender<ChannelState>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl<C: Connector> ChannelActor<C> {
    async fn run(mut self) {
        tracing::info!(room = %self.room, peer = %self.peer, "channel open");
        self.set_state(ChannelState::Open);
        let effects = self.presence.on_open();
        self.apply(effects).await;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ChannelCommand::Send { text, reply }) => {
                        let open = self.transport.is_open();
                        if open {
                            self.transport.send(&text).await;
                        }
                        let _ = reply.send(open);
                    }
                    Some(ChannelCommand::Status { reply }) => {
                        let _ = reply.send(self.status());
                    }
                    Some(ChannelCommand::Close { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        // All handles dropped; leave cleanly.
                        self.shutdown().await;
                        break;
                    }
                },
                event = self.transport_rx.recv() => match event {
                    Some(TransportEvent::Message(text)) => {
                        let effects =
                            self.presence.on_frame(decode_frame(&text));
                        self.apply(effects).await;
                    }
                    Some(TransportEvent::Open) => {}
                    Some(TransportEvent::Error(e)) => {
                        tracing::warn!(room = %self.room, error = %e, "transport fault");
                    }
                    Some(TransportEvent::Closed) | None => {
                        if !self.reconnect().await {
                            break;
                        }
                    }
                },
            }
        }

        tracing::info!(room = %self.room, peer = %self.peer, "channel actor stopped");
    }

    /// Runs the reconnection cycle after an unexpected disconnect.
    ///
    /// Returns `true` if the channel was restored. On `false` the state
    /// is already `Closed` and the actor loop should exit. At most one
    /// cycle runs at a time by construction, since it is called from the
    /// single actor loop.
    async fn reconnect(&mut self) -> bool {
        let attempts = self.config.max_reconnect_attempts;
        self.set_state(ChannelState::Reconnecting);
        tracing::warn!(
            room = %self.room,
            max_attempts = attempts,
            "connection lost, reconnecting"
        );

        for attempt in 1..=attempts {
            if !self.wait_reconnect_delay().await {
                return false;
            }
            match establish(
                self.connector.as_ref(),
                &self.room,
                &self.peer,
                &self.config,
            )
            .await
            {
                Ok((transport, rx)) => {
                    self.transport = transport;
                    self.transport_rx = rx;
                    tracing::info!(
                        room = %self.room,
                        attempt,
                        "reconnected"
                    );
                    self.set_state(ChannelState::Open);
                    let effects = self.presence.on_open();
                    self.apply(effects).await;
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        room = %self.room,
                        attempt,
                        error = %e,
                        "reconnection attempt failed"
                    );
                }
            }
        }

        tracing::error!(room = %self.room, attempts, "reconnection exhausted");
        let _ = self
            .events
            .send(ChannelEvent::ReconnectionExhausted { attempts });
        self.set_state(ChannelState::Closed);
        false
    }

    /// Waits the flat reconnect delay while staying responsive to
    /// commands. Returns `false` if the channel was closed meanwhile.
    async fn wait_reconnect_delay(&mut self) -> bool {
        let delay = tokio::time::sleep(self.config.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ChannelCommand::Send { reply, .. }) => {
                        let _ = reply.send(false);
                    }
                    Some(ChannelCommand::Status { reply }) => {
                        let _ = reply.send(self.status());
                    }
                    Some(ChannelCommand::Close { reply }) => {
                        self.set_state(ChannelState::Closed);
                        let _ = reply.send(());
                        return false;
                    }
                    None => {
                        self.set_state(ChannelState::Closed);
                        return false;
                    }
                },
            }
        }
    }

    async fn shutdown(&mut self) {
        let effects = self.presence.on_local_leave();
        self.apply(effects).await;
        self.transport.close().await;
        self.set_state(ChannelState::Closed);
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(msg) => match self.codec.encode(&msg) {
                    Ok(text) => self.transport.send(&text).await,
                    Err(e) => {
                        tracing::warn!(room = %self.room, error = %e, "encode failed");
                    }
                },
                Effect::App(event) => {
                    let _ = self.events.send(event);
                }
            }
        }
    }

    fn status(&self) -> ChannelStatus {
        ChannelStatus {
            room: self.room.clone(),
            peer: self.peer.clone(),
            state: *self.state.borrow(),
            peer_count: self.presence.state().peer_count(),
            host_id: self.presence.state().host_id().cloned(),
            is_host: self.presence.state().is_host(),
        }
    }

    fn set_state(&self, state: ChannelState) {
        let changed = self.state.send_modify_if(state);
        if changed {
            let _ = self.events.send(ChannelEvent::StateChanged(state));
        }
    }
}

/// `watch::Sender` has no conditional setter; this keeps the event
/// stream free of duplicate transitions.
trait SendIfChanged {
    fn send_modify_if(&self, next: ChannelState) -> bool;
}

impl SendIfChanged for watch::Sender<ChannelState> {
    fn send_modify_if(&self, next: ChannelState) -> bool {
        let mut changed = false;
        self.send_modify(|current| {
            if *current != next {
                *current = next;
                changed = true;
            }
        });
        changed
    }
}
