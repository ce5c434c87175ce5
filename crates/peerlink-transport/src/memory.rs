//! In-process transport pair for tests and demos.
//!
//! A [`MemoryNetwork`] links transports two at a time per room: the first
//! `connect()` for a room parks until a second arrives, then both sides
//! see [`TransportEvent::Open`] and exchange payloads directly. No bytes
//! leave the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use peerlink_protocol::{PeerId, RoomId};
use tokio::sync::{mpsc, oneshot};

use crate::{Connector, Transport, TransportError, TransportEvent};

/// One side's handle to an established link.
struct Half {
    sink: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
}

struct Waiter {
    half: Half,
    reply: oneshot::Sender<Half>,
}

type Registry = Arc<Mutex<HashMap<RoomId, Waiter>>>;

/// Pairs [`MemoryTransport`]s by room.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    waiting: Registry,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for MemoryNetwork {
    type Transport = MemoryTransport;

    async fn open(
        &self,
        room: &RoomId,
        peer: &PeerId,
    ) -> Result<MemoryTransport, TransportError> {
        Ok(MemoryTransport {
            room: room.clone(),
            peer: peer.clone(),
            waiting: Arc::clone(&self.waiting),
            open: Arc::new(AtomicBool::new(false)),
            link: Mutex::new(None),
        })
    }
}

/// A [`Transport`] whose remote endpoint lives in the same process.
pub struct MemoryTransport {
    room: RoomId,
    peer: PeerId,
    waiting: Registry,
    open: Arc<AtomicBool>,
    link: Mutex<Option<Link>>,
}

struct Link {
    self_sink: mpsc::UnboundedSender<TransportEvent>,
    partner: Half,
}

impl Transport for MemoryTransport {
    async fn connect(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let own = Half {
            sink: tx.clone(),
            open: Arc::clone(&self.open),
        };

        let pending = {
            let mut waiting = self.waiting.lock().expect("registry poisoned");
            match waiting.remove(&self.room) {
                Some(waiter) => {
                    // Second arrival completes the pair. Both sides open
                    // before either learns the link exists.
                    self.open.store(true, Ordering::SeqCst);
                    waiter.half.open.store(true, Ordering::SeqCst);
                    let _ = waiter.half.sink.send(TransportEvent::Open);
                    let _ = tx.send(TransportEvent::Open);
                    let _ = waiter.reply.send(own);
                    *self.link.lock().expect("link poisoned") = Some(Link {
                        self_sink: tx.clone(),
                        partner: waiter.half,
                    });
                    None
                }
                None => {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    waiting.insert(
                        self.room.clone(),
                        Waiter {
                            half: own,
                            reply: reply_tx,
                        },
                    );
                    Some(reply_rx)
                }
            }
        };

        if let Some(reply_rx) = pending {
            tracing::debug!(room = %self.room, peer = %self.peer, "waiting for partner");
            let partner = reply_rx
                .await
                .map_err(|_| TransportError::Closed)?;
            *self.link.lock().expect("link poisoned") = Some(Link {
                self_sink: tx,
                partner,
            });
        }

        Ok(rx)
    }

    async fn send(&self, payload: &str) {
        if !self.is_open() {
            tracing::warn!(
                room = %self.room,
                peer = %self.peer,
                "channel not open, dropping payload"
            );
            return;
        }
        if let Some(link) = &*self.link.lock().expect("link poisoned") {
            let _ = link
                .partner
                .sink
                .send(TransportEvent::Message(payload.to_string()));
        }
    }

    async fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(link) = self.link.lock().expect("link poisoned").take() {
            link.partner.open.store(false, Ordering::SeqCst);
            let _ = link.partner.sink.send(TransportEvent::Closed);
            let _ = link.self_sink.send(TransportEvent::Closed);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
