//! Listener registry: named event handlers, global or per-room.
//!
//! Handlers for the same event accumulate instead of replacing each
//! other; a dispatch invokes every matching handler in registration
//! order, global handlers before room-scoped ones. Deregistration goes
//! through the [`HandlerId`] returned at registration, so removing one
//! handler never disturbs the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use peerlink_protocol::{PeerId, RoomId};
use serde_json::Value;

/// What a listener receives on dispatch.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Room the event happened in.
    pub room: RoomId,
    /// Event name the listener was registered under.
    pub event: String,
    /// Remote peer that caused the event, when there is one.
    pub peer: Option<PeerId>,
    /// Event payload.
    pub data: Value,
}

/// A registered event handler.
pub type Listener = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Identifies one registration for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Inner {
    next_id: u64,
    global: HashMap<String, Vec<(HandlerId, Listener)>>,
    scoped: HashMap<(RoomId, String), Vec<(HandlerId, Listener)>>,
}

impl Inner {
    fn next_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }
}

/// Ordered registry of event listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<Inner>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `event` in every room.
    pub fn on(
        &self,
        event: impl Into<String>,
        listener: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> HandlerId {
        let mut inner = self.inner.lock().expect("registry poisoned");
        let id = inner.next_id();
        inner
            .global
            .entry(event.into())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Registers a handler for `event` in one room only.
    pub fn on_room(
        &self,
        room: RoomId,
        event: impl Into<String>,
        listener: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> HandlerId {
        let mut inner = self.inner.lock().expect("registry poisoned");
        let id = inner.next_id();
        inner
            .scoped
            .entry((room, event.into()))
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes one registration. Returns `false` if the id is unknown
    /// (or was already removed).
    pub fn off(&self, id: HandlerId) -> bool {
        let mut inner = self.inner.lock().expect("registry poisoned");
        let mut removed = false;
        for handlers in inner.global.values_mut() {
            let before = handlers.len();
            handlers.retain(|(hid, _)| *hid != id);
            removed |= handlers.len() != before;
        }
        for handlers in inner.scoped.values_mut() {
            let before = handlers.len();
            handlers.retain(|(hid, _)| *hid != id);
            removed |= handlers.len() != before;
        }
        removed
    }

    /// Invokes every handler matching the notification.
    ///
    /// Handlers run outside the registry lock, so a handler may register
    /// or remove handlers without deadlocking. A removal that races a
    /// dispatch may still see one final invocation.
    pub fn dispatch(&self, notification: &Notification) {
        let matching: Vec<Listener> = {
            let inner = self.inner.lock().expect("registry poisoned");
            let global = inner
                .global
                .get(&notification.event)
                .into_iter()
                .flatten();
            let key =
                (notification.room.clone(), notification.event.clone());
            let scoped = inner.scoped.get(&key).into_iter().flatten();
            global
                .chain(scoped)
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };
        for listener in matching {
            listener(notification);
        }
    }
}
