use super::roster::{PeerRecord, Roster};
use crate::peer::{
    pick_rarest, universe, BlockId, ChokeState, ChokingManager, PeerId, RequestHandler,
};
use crate::tracker::TrackerPeer;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Roster changes from one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDelta {
    pub joined: Vec<PeerId>,
    pub left: Vec<PeerId>,
}

impl RosterDelta {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// Everything the node's tasks share, behind one lock.
///
/// The lock is never held across I/O: callers copy what they need out,
/// talk to the network, then come back to record the result. No method
/// takes the lock twice.
pub struct SwarmState {
    local_peer: PeerId,
    universe: BTreeSet<BlockId>,
    inner: Mutex<StateInner>,
}

struct StateInner {
    blocks: BTreeMap<BlockId, Bytes>,
    roster: Roster,
    choking: ChokingManager,
    rng: StdRng,
}

impl SwarmState {
    pub fn new(local_peer: PeerId, total_blocks: u32, choking: ChokingManager, rng: StdRng) -> Self {
        Self {
            universe: universe(total_blocks),
            inner: Mutex::new(StateInner {
                blocks: BTreeMap::new(),
                roster: Roster::new(local_peer.clone()),
                choking,
                rng,
            }),
            local_peer,
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn universe(&self) -> &BTreeSet<BlockId> {
        &self.universe
    }

    pub fn total_blocks(&self) -> usize {
        self.universe.len()
    }

    pub fn owned_ids(&self) -> BTreeSet<BlockId> {
        self.inner.lock().blocks.keys().copied().collect()
    }

    pub fn owned_count(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    pub fn has_block(&self, id: BlockId) -> bool {
        self.inner.lock().blocks.contains_key(&id)
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().blocks.len() == self.universe.len()
    }

    /// Marks `id` as owned. Returns false if it already was, or if `id` is
    /// not part of the file.
    pub fn insert_block(&self, id: BlockId, data: Bytes) -> bool {
        if !self.universe.contains(&id) {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.blocks.contains_key(&id) {
            return false;
        }
        inner.blocks.insert(id, data);
        true
    }

    /// The next block to fetch and the peers holding it, in the order they
    /// should be tried.
    pub fn plan_download(&self) -> Option<(BlockId, Vec<(PeerId, SocketAddr)>)> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let owned: BTreeSet<BlockId> = inner.blocks.keys().copied().collect();
        let map = inner.roster.rarity_map();
        let block = pick_rarest(&owned, &self.universe, &map, &self.local_peer, &mut inner.rng)?;

        let mut holders = inner.roster.holders_of(block);
        holders.shuffle(&mut inner.rng);
        Some((block, holders))
    }

    /// A random subset of at most `fanout` known peers to tell about new
    /// blocks.
    pub fn announce_targets(&self, fanout: usize) -> Vec<(PeerId, SocketAddr)> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let all = inner.roster.addresses();
        all.choose_multiple(&mut inner.rng, fanout)
            .cloned()
            .collect()
    }

    pub fn all_targets(&self) -> Vec<(PeerId, SocketAddr)> {
        self.inner.lock().roster.addresses()
    }

    /// Adds or updates a peer, reporting new peers to the choking manager.
    pub fn upsert_peer(
        &self,
        peer: PeerId,
        addr: SocketAddr,
        blocks: impl IntoIterator<Item = BlockId>,
        now: Instant,
    ) -> bool {
        let mut inner = self.inner.lock();
        let joined = inner.roster.upsert(peer.clone(), addr, blocks, now);
        if joined {
            inner.choking.peer_joined(peer);
        }
        joined
    }

    pub fn mark_seen(&self, peer: &PeerId, now: Instant) {
        self.inner.lock().roster.touch(peer, now);
    }

    /// Applies the tracker's live peer list: unlisted peers leave, new ones
    /// join, known ones get their inventory merged.
    pub fn reconcile(&self, peers: &[TrackerPeer], now: Instant) -> RosterDelta {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut delta = RosterDelta::default();

        let listed: BTreeSet<&PeerId> = peers.iter().map(|p| &p.peer_id).collect();
        let gone: Vec<PeerId> = inner
            .roster
            .peer_ids()
            .into_iter()
            .filter(|id| !listed.contains(id))
            .collect();
        for peer in gone {
            inner.roster.remove(&peer);
            inner.choking.peer_left(&peer);
            delta.left.push(peer);
        }

        for peer in peers {
            if peer.peer_id == self.local_peer {
                continue;
            }
            let joined = inner.roster.upsert(
                peer.peer_id.clone(),
                peer.addr(),
                peer.blocks.iter().copied(),
                now,
            );
            if joined {
                inner.choking.peer_joined(peer.peer_id.clone());
                delta.joined.push(peer.peer_id.clone());
            }
        }

        delta
    }

    /// Drops roster records not seen within `timeout`.
    pub fn expire(&self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let stale = inner.roster.expire(now, timeout);
        for peer in &stale {
            inner.choking.peer_left(peer);
        }
        stale
    }

    pub fn run_choke_cycle(&self, now: Instant) -> ChokeState {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let map = inner.roster.rarity_map();
        inner.choking.run_cycle(now, &map, &self.universe)
    }

    pub fn choke_state(&self) -> ChokeState {
        self.inner.lock().choking.state()
    }

    pub fn roster(&self) -> Vec<PeerRecord> {
        self.inner.lock().roster.records().cloned().collect()
    }

    pub fn known_peers(&self) -> BTreeSet<PeerId> {
        self.inner.lock().choking.known_peers().clone()
    }
}

impl RequestHandler for SwarmState {
    fn is_unchoked(&self, peer: &PeerId) -> bool {
        self.inner.lock().choking.is_unchoked(peer)
    }

    fn block(&self, id: BlockId) -> Option<Bytes> {
        self.inner.lock().blocks.get(&id).cloned()
    }

    fn on_announce(&self, peer: PeerId, blocks: BTreeSet<BlockId>, addr: Option<SocketAddr>) {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.roster.merge_inventory(&peer, blocks.iter().copied(), now) {
            debug!(peer = %peer, count = blocks.len(), "inventory merged");
            return;
        }

        match addr {
            Some(addr) if peer != self.local_peer => {
                inner.roster.upsert(peer.clone(), addr, blocks, now);
                inner.choking.peer_joined(peer.clone());
                info!(peer = %peer, %addr, "peer joined through announcement");
            }
            _ => debug!(peer = %peer, "announcement from unknown peer ignored"),
        }
    }
}
