//! Integration tests for the channel actor.
//!
//! Two channels paired over a [`MemoryNetwork`] run the full presence
//! protocol in-process: join announcements, roster reconciliation, host
//! election, departure, and the reconnection cycle.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use peerlink_channel::{
    open_channel, ChannelConfig, ChannelError, ChannelEvent, ChannelHandle,
    ChannelState,
};
use peerlink_protocol::{PeerId, RoomId};
use peerlink_transport::{
    Connector, MemoryNetwork, MemoryTransport, TransportError,
};

type Events = mpsc::UnboundedReceiver<ChannelEvent>;

/// Waits for an event matching `pred`, discarding everything before it.
/// The bound is generous because paused-clock tests burn virtual time on
/// the reconnect delays.
async fn wait_for(
    events: &mut Events,
    pred: impl Fn(&ChannelEvent) -> bool,
) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream ended unexpectedly"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn open_pair(
    network: &Arc<MemoryNetwork>,
    room: &str,
) -> (ChannelHandle, Events, ChannelHandle, Events) {
    let room = RoomId::from(room);
    let (a, b) = tokio::join!(
        open_channel(
            Arc::clone(network),
            room.clone(),
            PeerId::from("alice"),
            json!({"name": "Alice"}),
            ChannelConfig::default(),
        ),
        open_channel(
            Arc::clone(network),
            room,
            PeerId::from("bob"),
            json!({"name": "Bob"}),
            ChannelConfig::default(),
        ),
    );
    let (a, a_events) = a.expect("alice should open");
    let (b, b_events) = b.expect("bob should open");
    (a, a_events, b, b_events)
}

#[tokio::test]
async fn test_pair_sees_each_other_join() {
    let network = Arc::new(MemoryNetwork::new());
    let (_a, mut a_events, _b, mut b_events) =
        open_pair(&network, "lobby").await;

    let joined = wait_for(&mut a_events, |e| {
        matches!(e, ChannelEvent::PeerJoined { .. })
    })
    .await;
    match joined {
        ChannelEvent::PeerJoined { peer, metadata } => {
            assert_eq!(peer, PeerId::from("bob"));
            assert_eq!(metadata, json!({"name": "Bob"}));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    wait_for(&mut b_events, |e| {
        matches!(e, ChannelEvent::PeerJoined { peer, .. } if peer.0 == "alice")
    })
    .await;
}

#[tokio::test]
async fn test_rosters_converge_on_one_host() {
    let network = Arc::new(MemoryNetwork::new());
    let (a, mut a_events, b, mut b_events) =
        open_pair(&network, "lobby").await;

    // The roster announcement is the last step of the join exchange;
    // once both sides have reconciled one, their elections agree.
    wait_for(&mut a_events, |e| {
        matches!(e, ChannelEvent::RoomState { peers } if peers.len() == 2)
    })
    .await;
    wait_for(&mut b_events, |e| {
        matches!(e, ChannelEvent::RoomState { peers } if peers.len() == 2)
    })
    .await;

    let a_status = a.status().await.expect("status");
    let b_status = b.status().await.expect("status");
    assert_eq!(a_status.peer_count, 2);
    assert_eq!(b_status.peer_count, 2);
    assert!(a_status.host_id.is_some());
    assert_eq!(a_status.host_id, b_status.host_id);
    // Exactly one side hosts.
    assert_ne!(a_status.is_host, b_status.is_host);
}

#[tokio::test]
async fn test_user_message_crosses_the_room() {
    let network = Arc::new(MemoryNetwork::new());
    let (a, _a_events, _b, mut b_events) = open_pair(&network, "lobby").await;

    let text = json!({"peer_id": "alice", "message": "hello bob"});
    assert!(a.send(text.to_string()).await);

    let received = wait_for(&mut b_events, |e| {
        matches!(e, ChannelEvent::Message { .. })
    })
    .await;
    assert_eq!(
        received,
        ChannelEvent::Message {
            peer: PeerId::from("alice"),
            text: "hello bob".into(),
        }
    );
}

#[tokio::test]
async fn test_departing_host_hands_over() {
    let network = Arc::new(MemoryNetwork::new());
    let (a, a_events, b, b_events) = open_pair(&network, "lobby").await;

    let mut a_events = a_events;
    let mut b_events = b_events;
    wait_for(&mut a_events, |e| {
        matches!(e, ChannelEvent::RoomState { peers } if peers.len() == 2)
    })
    .await;
    wait_for(&mut b_events, |e| {
        matches!(e, ChannelEvent::RoomState { peers } if peers.len() == 2)
    })
    .await;

    // Which side hosts depends on timing; close whichever won and watch
    // the survivor elect itself.
    let a_hosts = a.status().await.expect("status").is_host;
    let (host, survivor_events) = if a_hosts {
        (a, &mut b_events)
    } else {
        (b, &mut a_events)
    };

    host.close().await;

    wait_for(survivor_events, |e| {
        matches!(e, ChannelEvent::PeerLeft { .. })
    })
    .await;
    let changed = wait_for(survivor_events, |e| {
        matches!(e, ChannelEvent::HostChanged { .. })
    })
    .await;
    assert!(matches!(
        changed,
        ChannelEvent::HostChanged { is_local: true, .. }
    ));
}

// ---------------------------------------------------------------------------
// Reconnection
// ---------------------------------------------------------------------------

/// Pairs the first dial through a [`MemoryNetwork`], then fails every
/// later one. Models a peer whose remote side is gone for good.
struct FlakyConnector {
    inner: Arc<MemoryNetwork>,
    opens: AtomicU32,
}

impl FlakyConnector {
    fn new(inner: Arc<MemoryNetwork>) -> Self {
        Self {
            inner,
            opens: AtomicU32::new(0),
        }
    }
}

impl Connector for FlakyConnector {
    type Transport = MemoryTransport;

    async fn open(
        &self,
        room: &RoomId,
        peer: &PeerId,
    ) -> Result<MemoryTransport, TransportError> {
        if self.opens.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(TransportError::Connect("remote gone".into()));
        }
        self.inner.open(room, peer).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnection_exhausts_after_configured_attempts() {
    let network = Arc::new(MemoryNetwork::new());
    let flaky = Arc::new(FlakyConnector::new(Arc::clone(&network)));
    let room = RoomId::from("lobby");

    let (a, b) = tokio::join!(
        open_channel(
            Arc::clone(&flaky),
            room.clone(),
            PeerId::from("alice"),
            Value::Null,
            ChannelConfig::default(),
        ),
        open_channel(
            Arc::clone(&network),
            room,
            PeerId::from("bob"),
            Value::Null,
            ChannelConfig::default(),
        ),
    );
    let (alice, mut alice_events) = a.expect("alice should open");
    let (bob, _bob_events) = b.expect("bob should open");

    // Bob leaving closes the link; Alice's reconnects all fail.
    bob.close().await;

    wait_for(&mut alice_events, |e| {
        matches!(e, ChannelEvent::StateChanged(ChannelState::Reconnecting))
    })
    .await;
    let exhausted = wait_for(&mut alice_events, |e| {
        matches!(e, ChannelEvent::ReconnectionExhausted { .. })
    })
    .await;
    assert_eq!(
        exhausted,
        ChannelEvent::ReconnectionExhausted { attempts: 3 }
    );
    wait_for(&mut alice_events, |e| {
        matches!(e, ChannelEvent::StateChanged(ChannelState::Closed))
    })
    .await;

    // One initial dial plus one per attempt.
    assert_eq!(flaky.opens.load(Ordering::SeqCst), 4);
    assert_eq!(alice.state(), ChannelState::Closed);
    assert!(!alice.send("late").await);
}

#[tokio::test]
async fn test_close_cancels_reconnection() {
    let network = Arc::new(MemoryNetwork::new());
    let flaky = Arc::new(FlakyConnector::new(Arc::clone(&network)));
    let room = RoomId::from("lobby");

    // A long delay keeps the cycle parked in its wait so the close
    // command is what ends it.
    let config = ChannelConfig {
        reconnect_delay: Duration::from_secs(60),
        ..ChannelConfig::default()
    };

    let (a, b) = tokio::join!(
        open_channel(
            Arc::clone(&flaky),
            room.clone(),
            PeerId::from("alice"),
            Value::Null,
            config.clone(),
        ),
        open_channel(
            Arc::clone(&network),
            room,
            PeerId::from("bob"),
            Value::Null,
            config,
        ),
    );
    let (alice, mut alice_events) = a.expect("alice should open");
    let (bob, _bob_events) = b.expect("bob should open");

    bob.close().await;
    wait_for(&mut alice_events, |e| {
        matches!(e, ChannelEvent::StateChanged(ChannelState::Reconnecting))
    })
    .await;

    alice.close().await;

    wait_for(&mut alice_events, |e| {
        matches!(e, ChannelEvent::StateChanged(ChannelState::Closed))
    })
    .await;
    // Giving up was a decision, not an exhaustion.
    while let Ok(event) = alice_events.try_recv() {
        assert!(!matches!(
            event,
            ChannelEvent::ReconnectionExhausted { .. }
        ));
    }
    assert_eq!(flaky.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_times_out_without_a_partner() {
    let network = Arc::new(MemoryNetwork::new());
    let result = open_channel(
        network,
        RoomId::from("empty"),
        PeerId::from("alice"),
        Value::Null,
        ChannelConfig::default(),
    )
    .await;

    match result {
        Err(ChannelError::Transport(TransportError::Timeout(bound))) => {
            assert_eq!(bound, Duration::from_secs(30));
        }
        Err(other) => panic!("expected a timeout, got {other}"),
        Ok(_) => panic!("open should not succeed without a partner"),
    }
}
