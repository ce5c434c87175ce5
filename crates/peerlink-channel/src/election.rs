//! Host election.
//!
//! Every peer runs the same deterministic election over its own roster,
//! so converged rosters yield the same host without any coordination.

use peerlink_protocol::PeerId;

use crate::PeerRecord;

/// Picks a host from a roster. Must be deterministic: equal rosters
/// elect equal hosts on every peer.
pub trait ElectionStrategy: Send + Sync + 'static {
    /// Returns the elected host, or `None` for an empty roster.
    fn elect(&self, peers: &[&PeerRecord]) -> Option<PeerId>;
}

/// Elects the longest-standing member, the peer with the smallest join
/// time. Ties break on peer id so the result is total.
#[derive(Debug, Clone, Copy, Default)]
pub struct OldestPeer;

impl ElectionStrategy for OldestPeer {
    fn elect(&self, peers: &[&PeerRecord]) -> Option<PeerId> {
        peers
            .iter()
            .min_by(|a, b| {
                a.join_time.cmp(&b.join_time).then_with(|| a.id.cmp(&b.id))
            })
            .map(|record| record.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn record(id: &str, join_time: u64) -> PeerRecord {
        PeerRecord {
            id: PeerId::from(id),
            join_time,
            last_seen: join_time,
            metadata: Value::Null,
        }
    }

    #[test]
    fn test_oldest_peer_wins() {
        let a = record("a", 30);
        let b = record("b", 10);
        let c = record("c", 20);
        let host = OldestPeer.elect(&[&a, &b, &c]);
        assert_eq!(host, Some(PeerId::from("b")));
    }

    #[test]
    fn test_join_time_ties_break_on_id() {
        let x = record("x", 10);
        let y = record("y", 10);
        assert_eq!(OldestPeer.elect(&[&y, &x]), Some(PeerId::from("x")));
    }

    #[test]
    fn test_empty_roster_elects_nobody() {
        assert_eq!(OldestPeer.elect(&[]), None);
    }
}
