use crate::peer::{BlockId, PeerId, RarityMap};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// What the node knows about one remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub addr: SocketAddr,
    /// Observed inventory. Only grows: blocks are never un-owned.
    pub blocks: BTreeSet<BlockId>,
    pub last_seen: Instant,
}

/// Known remote peers, keyed by id. The local node is never a member.
#[derive(Debug)]
pub struct Roster {
    local_peer: PeerId,
    peers: BTreeMap<PeerId, PeerRecord>,
}

impl Roster {
    pub fn new(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            peers: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn get(&self, peer: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(peer)
    }

    pub fn records(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    pub fn peer_ids(&self) -> BTreeSet<PeerId> {
        self.peers.keys().cloned().collect()
    }

    /// Inserts or updates a record. Returns true if the peer was not known.
    pub fn upsert(
        &mut self,
        peer: PeerId,
        addr: SocketAddr,
        blocks: impl IntoIterator<Item = BlockId>,
        now: Instant,
    ) -> bool {
        if peer == self.local_peer {
            return false;
        }

        match self.peers.get_mut(&peer) {
            Some(record) => {
                record.addr = addr;
                record.blocks.extend(blocks);
                record.last_seen = now;
                false
            }
            None => {
                self.peers.insert(
                    peer.clone(),
                    PeerRecord {
                        peer_id: peer,
                        addr,
                        blocks: blocks.into_iter().collect(),
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Merges announced blocks into a known peer's inventory. Returns false
    /// if the peer is unknown.
    pub fn merge_inventory(
        &mut self,
        peer: &PeerId,
        blocks: impl IntoIterator<Item = BlockId>,
        now: Instant,
    ) -> bool {
        match self.peers.get_mut(peer) {
            Some(record) => {
                record.blocks.extend(blocks);
                record.last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn touch(&mut self, peer: &PeerId, now: Instant) {
        if let Some(record) = self.peers.get_mut(peer) {
            record.last_seen = now;
        }
    }

    pub fn remove(&mut self, peer: &PeerId) -> Option<PeerRecord> {
        self.peers.remove(peer)
    }

    /// Drops records not seen for longer than `timeout` and returns their
    /// ids.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        let stale: Vec<PeerId> = self
            .peers
            .values()
            .filter(|r| now.saturating_duration_since(r.last_seen) > timeout)
            .map(|r| r.peer_id.clone())
            .collect();

        for peer in &stale {
            self.peers.remove(peer);
        }
        stale
    }

    /// Peers whose observed inventory contains `block`, in id order.
    pub fn holders_of(&self, block: BlockId) -> Vec<(PeerId, SocketAddr)> {
        self.peers
            .values()
            .filter(|r| r.blocks.contains(&block))
            .map(|r| (r.peer_id.clone(), r.addr))
            .collect()
    }

    pub fn addresses(&self) -> Vec<(PeerId, SocketAddr)> {
        self.peers
            .values()
            .map(|r| (r.peer_id.clone(), r.addr))
            .collect()
    }

    pub fn rarity_map(&self) -> RarityMap {
        self.peers
            .iter()
            .map(|(id, r)| (id.clone(), r.blocks.clone()))
            .collect()
    }
}
