use super::error::TrackerError;
use super::response::{PeerListResponse, RegisterResponse, Registration, TrackerPeer};
use super::Tracker;
use crate::constants::PEER_TIMEOUT;
use crate::peer::{BlockId, PeerId};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    addr: SocketAddr,
    blocks: BTreeSet<BlockId>,
    last_seen: Instant,
}

struct Distribution {
    total_blocks: u32,
    rng: StdRng,
}

impl Distribution {
    /// Between a third and a half of the file, chosen at random.
    fn draw(&mut self) -> BTreeSet<BlockId> {
        let total = self.total_blocks as usize;
        if total == 0 {
            return BTreeSet::new();
        }
        let min = (total / 3).max(1).min(total);
        let max = (total / 2).max(2).min(total).max(min);
        let count = self.rng.random_range(min..=max);

        index::sample(&mut self.rng, total, count)
            .into_iter()
            .map(|i| i as BlockId)
            .collect()
    }
}

#[derive(Default)]
struct Registry {
    peers: BTreeMap<PeerId, Entry>,
    grants: BTreeMap<PeerId, BTreeSet<BlockId>>,
    distribution: Option<Distribution>,
}

/// In-process tracker with the same semantics as the HTTP one.
///
/// Useful to run a swarm inside a single process. Clones share the same
/// registry.
#[derive(Clone)]
pub struct LocalTracker {
    registry: Arc<Mutex<Registry>>,
    peer_timeout: Duration,
}

impl LocalTracker {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            peer_timeout: PEER_TIMEOUT,
        }
    }

    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }

    /// Grants every first-time registrant a random share of `total_blocks`.
    pub fn with_distribution(self, total_blocks: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        self.registry.lock().distribution = Some(Distribution { total_blocks, rng });
        self
    }

    /// Blocks handed to `peer_id` when it first registers.
    pub fn grant(&self, peer_id: impl Into<PeerId>, blocks: impl IntoIterator<Item = BlockId>) {
        self.registry
            .lock()
            .grants
            .insert(peer_id.into(), blocks.into_iter().collect());
    }

    /// Drops a peer as if it had gone silent.
    pub fn remove(&self, peer_id: &PeerId) -> bool {
        self.registry.lock().peers.remove(peer_id).is_some()
    }

    pub fn peers(&self) -> Vec<TrackerPeer> {
        let registry = self.registry.lock();
        registry
            .peers
            .iter()
            .map(|(id, entry)| to_tracker_peer(id, entry))
            .collect()
    }

    pub fn blocks_of(&self, peer_id: &PeerId) -> Option<BTreeSet<BlockId>> {
        self.registry
            .lock()
            .peers
            .get(peer_id)
            .map(|entry| entry.blocks.clone())
    }
}

impl Default for LocalTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn to_tracker_peer(peer_id: &PeerId, entry: &Entry) -> TrackerPeer {
    TrackerPeer {
        peer_id: peer_id.clone(),
        ip: entry.addr.ip(),
        port: entry.addr.port(),
        blocks: entry.blocks.iter().copied().collect(),
    }
}

#[async_trait]
impl Tracker for LocalTracker {
    async fn register(&self, registration: &Registration) -> Result<RegisterResponse, TrackerError> {
        let mut registry = self.registry.lock();
        let reported: BTreeSet<BlockId> = registry_blocks(&registration.blocks);
        let now = Instant::now();

        let initial = if registry.peers.contains_key(&registration.peer_id) {
            BTreeSet::new()
        } else {
            match registry.grants.remove(&registration.peer_id) {
                Some(granted) => granted,
                None => registry
                    .distribution
                    .as_mut()
                    .map(Distribution::draw)
                    .unwrap_or_default(),
            }
        };

        let blocks = initial.union(&reported).copied().collect();
        registry.peers.insert(
            registration.peer_id.clone(),
            Entry {
                addr: registration.addr(),
                blocks,
                last_seen: now,
            },
        );
        debug!(
            peer = %registration.peer_id,
            granted = initial.len(),
            "peer registered"
        );

        Ok(RegisterResponse {
            message: Some("registered".to_string()),
            peers: registry
                .peers
                .iter()
                .map(|(id, entry)| to_tracker_peer(id, entry))
                .collect(),
            initial_blocks: initial.into_iter().collect(),
        })
    }

    async fn refresh(
        &self,
        peer_id: &PeerId,
        blocks: &[BlockId],
    ) -> Result<PeerListResponse, TrackerError> {
        let mut registry = self.registry.lock();
        let now = Instant::now();
        let timeout = self.peer_timeout;

        registry
            .peers
            .retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= timeout);

        if let Some(entry) = registry.peers.get_mut(peer_id) {
            entry.blocks = registry_blocks(blocks);
            entry.last_seen = now;
        }

        Ok(PeerListResponse {
            peers: registry
                .peers
                .iter()
                .filter(|(id, _)| *id != peer_id)
                .map(|(id, entry)| to_tracker_peer(id, entry))
                .collect(),
        })
    }

    async fn deregister(&self, peer_id: &PeerId) -> Result<(), TrackerError> {
        if self.remove(peer_id) {
            debug!(peer = %peer_id, "peer deregistered");
            Ok(())
        } else {
            Err(TrackerError::UnknownPeer(peer_id.clone()))
        }
    }
}

fn registry_blocks(blocks: &[BlockId]) -> BTreeSet<BlockId> {
    blocks.iter().copied().collect()
}
