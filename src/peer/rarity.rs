use super::block::BlockId;
use super::peer_id::PeerId;
use crate::constants::RARITY_RATIO;
use std::collections::{BTreeMap, BTreeSet};

/// Observed inventory of every known peer.
pub type RarityMap = BTreeMap<PeerId, BTreeSet<BlockId>>;

/// Scores peers by how many globally rare blocks they hold.
///
/// A block is rare when its holder count is at most
/// `max(1, floor(ratio * reporting_peers))`, where reporting peers are the
/// peers (other than ourselves) that reported a non-empty inventory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RarityScorer {
    ratio: f64,
}

impl RarityScorer {
    pub fn new(ratio: f64) -> Self {
        Self { ratio }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn threshold(&self, reporting_peers: usize) -> usize {
        ((reporting_peers as f64 * self.ratio).floor() as usize).max(1)
    }

    /// Counts holders of each block in `universe`, ignoring `local_peer`'s
    /// own entry so our inventory never makes anything look common.
    pub fn snapshot(
        &self,
        map: &RarityMap,
        universe: &BTreeSet<BlockId>,
        local_peer: &PeerId,
    ) -> RaritySnapshot {
        let mut holders: BTreeMap<BlockId, usize> = universe.iter().map(|&id| (id, 0)).collect();
        let mut reporting_peers = 0;

        for (peer, blocks) in map {
            if peer == local_peer || blocks.is_empty() {
                continue;
            }
            reporting_peers += 1;
            for id in blocks {
                if let Some(count) = holders.get_mut(id) {
                    *count += 1;
                }
            }
        }

        RaritySnapshot {
            threshold: self.threshold(reporting_peers),
            holders,
            reporting_peers,
        }
    }

    /// Score of a single peer. Unknown peers score 0.
    pub fn score(
        &self,
        target: &PeerId,
        map: &RarityMap,
        universe: &BTreeSet<BlockId>,
        local_peer: &PeerId,
    ) -> usize {
        match map.get(target) {
            Some(blocks) => self.snapshot(map, universe, local_peer).score(blocks),
            None => 0,
        }
    }
}

impl Default for RarityScorer {
    fn default() -> Self {
        Self::new(RARITY_RATIO)
    }
}

/// Holder counts computed once and reused to score several peers.
#[derive(Debug, Clone)]
pub struct RaritySnapshot {
    holders: BTreeMap<BlockId, usize>,
    reporting_peers: usize,
    threshold: usize,
}

impl RaritySnapshot {
    pub fn holders(&self, id: BlockId) -> usize {
        self.holders.get(&id).copied().unwrap_or(0)
    }

    pub fn reporting_peers(&self) -> usize {
        self.reporting_peers
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_rare(&self, id: BlockId) -> bool {
        // Blocks outside the universe are never rare.
        self.holders
            .get(&id)
            .is_some_and(|&count| count <= self.threshold)
    }

    /// Number of rare blocks in `blocks`. Zero when no other peer has
    /// reported anything.
    pub fn score(&self, blocks: &BTreeSet<BlockId>) -> usize {
        if self.reporting_peers == 0 {
            return 0;
        }
        blocks.iter().filter(|&&id| self.is_rare(id)).count()
    }
}
