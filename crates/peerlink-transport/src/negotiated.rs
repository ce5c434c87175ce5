//! [`Transport`] built from an opaque negotiation primitive plus a relay.
//!
//! The handshake internals (candidate gathering, media/security
//! negotiation) live behind the [`PeerEndpoint`] trait; this module only
//! sequences them: create an offer, ferry it through the relay, apply the
//! answer, then forward endpoint events as transport notifications.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use peerlink_protocol::{PeerId, RoomId};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{Connector, RelayClient, Transport, TransportError, TransportEvent};

/// A status notification from a [`PeerEndpoint`].
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    /// The negotiated channel opened.
    Open,
    /// A payload arrived.
    Message(String),
    /// Connectivity was lost in a way the endpoint may be able to repair
    /// (an ICE-style failure). See [`PeerEndpoint::restart`].
    ConnectivityLost,
    /// A non-fatal endpoint fault.
    Error(String),
    /// The channel closed for good.
    Closed,
}

/// The opaque transport-negotiation capability.
///
/// Implementations wrap whatever primitive actually negotiates the
/// encrypted duplex channel. This crate never looks inside offers,
/// answers, or candidates; they are ferried as opaque JSON values.
pub trait PeerEndpoint: Send + Sync + 'static {
    /// Creates the local offer and starts candidate discovery.
    fn create_offer(
        &self,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;

    /// Applies the remote answer received through the relay.
    fn apply_answer(
        &self,
        answer: Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Takes the stream of locally discovered candidate hints.
    /// Returns `None` if already taken.
    fn take_candidates(&self) -> Option<mpsc::UnboundedReceiver<Value>>;

    /// Takes the endpoint's event stream. Returns `None` if already taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EndpointEvent>>;

    /// Sends a payload. Returns `false` if the channel wasn't open.
    fn send(&self, payload: &str) -> impl Future<Output = bool> + Send;

    /// Closes the endpoint.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Attempts an ICE-style restart after lost connectivity.
    /// Returns `false` if the primitive doesn't support restarts or the
    /// attempt could not be started.
    fn restart(&self) -> impl Future<Output = bool> + Send;

    /// Whether the negotiated channel is currently open.
    fn is_open(&self) -> bool;
}

/// A [`Transport`] that negotiates its channel through a relay.
pub struct NegotiatedTransport<E, R> {
    room: RoomId,
    peer: PeerId,
    endpoint: Arc<E>,
    relay: Arc<R>,
    open: Arc<AtomicBool>,
}

impl<E: PeerEndpoint, R: RelayClient> NegotiatedTransport<E, R> {
    pub fn new(room: RoomId, peer: PeerId, endpoint: E, relay: Arc<R>) -> Self {
        Self {
            room,
            peer,
            endpoint: Arc::new(endpoint),
            relay,
            open: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<E: PeerEndpoint, R: RelayClient> Transport for NegotiatedTransport<E, R> {
    async fn connect(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        let offer = self.endpoint.create_offer().await?;
        let answer = self
            .relay
            .submit_offer(&self.room, &self.peer, offer)
            .await?;
        if !answer.is_object() {
            return Err(TransportError::Negotiation(
                "answer is not a JSON object".into(),
            ));
        }
        self.endpoint.apply_answer(answer).await?;

        // Candidate hints flow to the relay independently of the main
        // handshake. A failed submission is logged, never fatal.
        if let Some(mut candidates) = self.endpoint.take_candidates() {
            let relay = Arc::clone(&self.relay);
            let room = self.room.clone();
            let peer = self.peer.clone();
            tokio::spawn(async move {
                while let Some(candidate) = candidates.recv().await {
                    if let Err(e) =
                        relay.submit_candidate(&room, &peer, candidate).await
                    {
                        tracing::warn!(
                            %room,
                            error = %e,
                            "candidate submission failed"
                        );
                    }
                }
            });
        }

        let mut events = self.endpoint.take_events().ok_or_else(|| {
            TransportError::Negotiation("endpoint events already consumed".into())
        })?;
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = Arc::clone(&self.endpoint);
        let open = Arc::clone(&self.open);
        let room = self.room.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let forwarded = match event {
                    EndpointEvent::Open => {
                        open.store(true, Ordering::SeqCst);
                        TransportEvent::Open
                    }
                    EndpointEvent::Message(text) => {
                        TransportEvent::Message(text)
                    }
                    EndpointEvent::Error(e) => TransportEvent::Error(e),
                    EndpointEvent::ConnectivityLost => {
                        if endpoint.restart().await {
                            tracing::info!(
                                %room,
                                "connectivity lost, restart initiated"
                            );
                            continue;
                        }
                        open.store(false, Ordering::SeqCst);
                        TransportEvent::Closed
                    }
                    EndpointEvent::Closed => {
                        open.store(false, Ordering::SeqCst);
                        TransportEvent::Closed
                    }
                };
                let closing = forwarded == TransportEvent::Closed;
                // A send error means the channel was torn down; any late
                // events are discarded rather than applied.
                if tx.send(forwarded).is_err() || closing {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, payload: &str) {
        if !self.is_open() {
            tracing::warn!(
                room = %self.room,
                "channel not open, dropping payload"
            );
            return;
        }
        if !self.endpoint.send(payload).await {
            tracing::warn!(room = %self.room, "endpoint refused payload");
        }
    }

    async fn close(&self) {
        if let Err(e) = self.relay.announce_leave(&self.room, &self.peer).await
        {
            tracing::warn!(
                room = %self.room,
                error = %e,
                "leave announcement failed"
            );
        }
        self.open.store(false, Ordering::SeqCst);
        self.endpoint.close().await;
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Creates [`PeerEndpoint`]s, one per connection attempt.
pub trait EndpointFactory: Send + Sync + 'static {
    type Endpoint: PeerEndpoint;

    fn create(
        &self,
    ) -> impl Future<Output = Result<Self::Endpoint, TransportError>> + Send;
}

/// [`Connector`] producing [`NegotiatedTransport`]s.
pub struct NegotiatedConnector<F, R> {
    factory: F,
    relay: Arc<R>,
}

impl<F: EndpointFactory, R: RelayClient> NegotiatedConnector<F, R> {
    pub fn new(factory: F, relay: R) -> Self {
        Self {
            factory,
            relay: Arc::new(relay),
        }
    }
}

impl<F: EndpointFactory, R: RelayClient> Connector
    for NegotiatedConnector<F, R>
{
    type Transport = NegotiatedTransport<F::Endpoint, R>;

    async fn open(
        &self,
        room: &RoomId,
        peer: &PeerId,
    ) -> Result<Self::Transport, TransportError> {
        let endpoint = self.factory.create().await?;
        Ok(NegotiatedTransport::new(
            room.clone(),
            peer.clone(),
            endpoint,
            Arc::clone(&self.relay),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Endpoint double that records calls and lets tests drive events.
    struct MockEndpoint {
        open: AtomicBool,
        restartable: bool,
        restarts: Mutex<u32>,
        applied_answer: Mutex<Option<Value>>,
        sent: Mutex<Vec<String>>,
        event_tx: mpsc::UnboundedSender<EndpointEvent>,
        event_rx: Mutex<Option<mpsc::UnboundedReceiver<EndpointEvent>>>,
        candidate_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    }

    impl MockEndpoint {
        fn new(restartable: bool) -> (Arc<Self>, mpsc::UnboundedSender<Value>) {
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
            let endpoint = Arc::new(Self {
                open: AtomicBool::new(false),
                restartable,
                restarts: Mutex::new(0),
                applied_answer: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
                event_tx,
                event_rx: Mutex::new(Some(event_rx)),
                candidate_rx: Mutex::new(Some(candidate_rx)),
            });
            (endpoint, candidate_tx)
        }
    }

    impl PeerEndpoint for Arc<MockEndpoint> {
        async fn create_offer(&self) -> Result<Value, TransportError> {
            Ok(serde_json::json!({"type": "offer", "sdp": "v=0"}))
        }

        async fn apply_answer(
            &self,
            answer: Value,
        ) -> Result<(), TransportError> {
            *self.applied_answer.lock().unwrap() = Some(answer);
            Ok(())
        }

        fn take_candidates(&self) -> Option<mpsc::UnboundedReceiver<Value>> {
            self.candidate_rx.lock().unwrap().take()
        }

        fn take_events(
            &self,
        ) -> Option<mpsc::UnboundedReceiver<EndpointEvent>> {
            self.event_rx.lock().unwrap().take()
        }

        async fn send(&self, payload: &str) -> bool {
            self.sent.lock().unwrap().push(payload.to_string());
            true
        }

        async fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }

        async fn restart(&self) -> bool {
            *self.restarts.lock().unwrap() += 1;
            self.restartable
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    /// Relay double with a scriptable answer and failure switches.
    struct MockRelay {
        answer: Value,
        fail_candidates: bool,
        offers: Mutex<u32>,
        candidates: Mutex<Vec<Value>>,
        leaves: Mutex<u32>,
    }

    impl MockRelay {
        fn with_answer(answer: Value) -> Self {
            Self {
                answer,
                fail_candidates: false,
                offers: Mutex::new(0),
                candidates: Mutex::new(Vec::new()),
                leaves: Mutex::new(0),
            }
        }
    }

    impl RelayClient for MockRelay {
        async fn submit_offer(
            &self,
            _room: &RoomId,
            _peer: &PeerId,
            _offer: Value,
        ) -> Result<Value, TransportError> {
            *self.offers.lock().unwrap() += 1;
            Ok(self.answer.clone())
        }

        async fn submit_candidate(
            &self,
            _room: &RoomId,
            _peer: &PeerId,
            candidate: Value,
        ) -> Result<(), TransportError> {
            if self.fail_candidates {
                return Err(TransportError::Relay("candidate refused".into()));
            }
            self.candidates.lock().unwrap().push(candidate);
            Ok(())
        }

        async fn announce_leave(
            &self,
            _room: &RoomId,
            _peer: &PeerId,
        ) -> Result<(), TransportError> {
            *self.leaves.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn transport(
        endpoint: Arc<MockEndpoint>,
        relay: MockRelay,
    ) -> (NegotiatedTransport<Arc<MockEndpoint>, MockRelay>, Arc<MockRelay>)
    {
        let relay = Arc::new(relay);
        (
            NegotiatedTransport {
                room: RoomId::from("r"),
                peer: PeerId::from("p"),
                endpoint: Arc::new(endpoint),
                relay: Arc::clone(&relay),
                open: Arc::new(AtomicBool::new(false)),
            },
            relay,
        )
    }

    #[tokio::test]
    async fn test_connect_submits_offer_and_applies_answer() {
        let (endpoint, _candidates) = MockEndpoint::new(false);
        let answer = serde_json::json!({"type": "answer", "sdp": "v=0"});
        let (mut t, relay) =
            transport(Arc::clone(&endpoint), MockRelay::with_answer(answer.clone()));

        t.connect().await.expect("connect should succeed");

        assert_eq!(*relay.offers.lock().unwrap(), 1);
        assert_eq!(*endpoint.applied_answer.lock().unwrap(), Some(answer));
    }

    #[tokio::test]
    async fn test_connect_rejects_non_object_answer() {
        let (endpoint, _candidates) = MockEndpoint::new(false);
        let (mut t, _relay) = transport(
            endpoint,
            MockRelay::with_answer(serde_json::json!("not an object")),
        );

        let result = t.connect().await;
        assert!(matches!(result, Err(TransportError::Negotiation(_))));
    }

    #[tokio::test]
    async fn test_candidate_failures_are_not_fatal() {
        let (endpoint, candidate_tx) = MockEndpoint::new(false);
        let mut relay = MockRelay::with_answer(serde_json::json!({}));
        relay.fail_candidates = true;
        let (mut t, _relay) = transport(Arc::clone(&endpoint), relay);

        let mut events = t.connect().await.expect("connect should succeed");

        // Candidates failing to submit must not disturb the channel.
        candidate_tx.send(serde_json::json!({"c": 1})).unwrap();
        endpoint.event_tx.send(EndpointEvent::Open).unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Open));
        assert!(t.is_open());
    }

    #[tokio::test]
    async fn test_connectivity_loss_restarts_instead_of_closing() {
        let (endpoint, _candidates) = MockEndpoint::new(true);
        let (mut t, _relay) =
            transport(Arc::clone(&endpoint), MockRelay::with_answer(serde_json::json!({})));

        let mut events = t.connect().await.unwrap();
        endpoint.event_tx.send(EndpointEvent::Open).unwrap();
        endpoint.event_tx.send(EndpointEvent::ConnectivityLost).unwrap();
        endpoint
            .event_tx
            .send(EndpointEvent::Message("after".into()))
            .unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::Open));
        // The loss is swallowed by the restart attempt; traffic resumes.
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message("after".into()))
        );
        assert_eq!(*endpoint.restarts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_connectivity_loss_without_restart_support_closes() {
        let (endpoint, _candidates) = MockEndpoint::new(false);
        let (mut t, _relay) =
            transport(Arc::clone(&endpoint), MockRelay::with_answer(serde_json::json!({})));

        let mut events = t.connect().await.unwrap();
        endpoint.event_tx.send(EndpointEvent::Open).unwrap();
        endpoint.event_tx.send(EndpointEvent::ConnectivityLost).unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::Open));
        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
        assert!(!t.is_open());
    }

    #[tokio::test]
    async fn test_send_before_open_is_dropped() {
        let (endpoint, _candidates) = MockEndpoint::new(false);
        let (mut t, _relay) =
            transport(Arc::clone(&endpoint), MockRelay::with_answer(serde_json::json!({})));

        let _events = t.connect().await.unwrap();
        t.send("too early").await;
        assert!(endpoint.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_announces_leave() {
        let (endpoint, _candidates) = MockEndpoint::new(false);
        let (mut t, relay) =
            transport(endpoint, MockRelay::with_answer(serde_json::json!({})));

        let _events = t.connect().await.unwrap();
        t.close().await;
        assert_eq!(*relay.leaves.lock().unwrap(), 1);
        assert!(!t.is_open());
    }
}
