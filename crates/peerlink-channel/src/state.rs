//! Local room roster.
//!
//! Every channel keeps its own view of who is in the room and who hosts
//! it. The view is updated from presence messages and reconciled against
//! roster announcements; two peers that exchange announcements converge
//! on identical rosters because join times merge towards their minimum.

use std::collections::HashMap;

use peerlink_protocol::{now_millis, PeerEntry, PeerId};
use serde_json::Value;

/// One peer as seen by the local roster.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub id: PeerId,
    /// Epoch milliseconds of the earliest join this roster knows about.
    pub join_time: u64,
    /// Epoch milliseconds of the last frame seen from this peer. Purely
    /// informational; silence never removes a peer from the roster.
    pub last_seen: u64,
    pub metadata: Value,
}

/// The local view of a room: members plus the elected host.
#[derive(Debug, Clone)]
pub struct RoomState {
    local: PeerId,
    peers: HashMap<PeerId, PeerRecord>,
    host_id: Option<PeerId>,
}

impl RoomState {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            peers: HashMap::new(),
            host_id: None,
        }
    }

    /// The local peer's identity.
    pub fn local(&self) -> &PeerId {
        &self.local
    }

    /// Adds a peer. Returns `false` if the peer was already known, in
    /// which case only its metadata is refreshed.
    pub fn insert_peer(
        &mut self,
        id: PeerId,
        join_time: u64,
        metadata: Value,
    ) -> bool {
        match self.peers.get_mut(&id) {
            Some(existing) => {
                existing.metadata = metadata;
                false
            }
            None => {
                self.peers.insert(
                    id.clone(),
                    PeerRecord {
                        id,
                        join_time,
                        last_seen: join_time,
                        metadata,
                    },
                );
                true
            }
        }
    }

    /// Marks a peer as heard from.
    pub fn touch(&mut self, id: &PeerId, at: u64) {
        if let Some(record) = self.peers.get_mut(id) {
            record.last_seen = record.last_seen.max(at);
        }
    }

    /// Registers the local peer, stamped with the current time.
    pub fn insert_local(&mut self, metadata: Value) {
        let local = self.local.clone();
        self.insert_peer(local, now_millis(), metadata);
    }

    /// Removes a peer. Returns `false` if it was not present.
    pub fn remove_peer(&mut self, id: &PeerId) -> bool {
        self.peers.remove(id).is_some()
    }

    /// Reconciles an announced roster into the local one.
    ///
    /// Known peers keep the smaller of the local and announced join
    /// times; unknown peers are inserted as announced. Peers the
    /// announcement omits are kept, since the announcer may simply not
    /// have met them yet. The announced host is ignored; the caller
    /// re-elects from the merged roster instead.
    pub fn merge(&mut self, announced: &[PeerEntry]) {
        for entry in announced {
            match self.peers.get_mut(&entry.id) {
                Some(existing) => {
                    existing.join_time =
                        existing.join_time.min(entry.join_time);
                }
                None => {
                    self.peers.insert(
                        entry.id.clone(),
                        PeerRecord {
                            id: entry.id.clone(),
                            join_time: entry.join_time,
                            last_seen: entry.join_time,
                            metadata: entry.metadata.clone(),
                        },
                    );
                }
            }
        }
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Current host, if one has been elected.
    pub fn host_id(&self) -> Option<&PeerId> {
        self.host_id.as_ref()
    }

    /// Whether the local peer is the current host.
    pub fn is_host(&self) -> bool {
        self.host_id.as_ref() == Some(&self.local)
    }

    /// Records the election result. Returns `true` if the host changed.
    pub fn set_host(&mut self, host: Option<PeerId>) -> bool {
        if self.host_id == host {
            return false;
        }
        self.host_id = host;
        true
    }

    /// Drops all members and the host. Used when a channel starts a
    /// fresh session after reconnecting.
    pub fn clear(&mut self) {
        self.peers.clear();
        self.host_id = None;
    }

    /// The roster as wire entries, ordered by join time then id so every
    /// peer announces the same sequence.
    pub fn snapshot(&self) -> Vec<PeerEntry> {
        let mut entries: Vec<PeerEntry> = self
            .peers
            .values()
            .map(|record| PeerEntry {
                id: record.id.clone(),
                join_time: record.join_time,
                metadata: record.metadata.clone(),
            })
            .collect();
        entries.sort_by(|a, b| {
            a.join_time.cmp(&b.join_time).then_with(|| a.id.cmp(&b.id))
        });
        entries
    }
}
