//! Rarest-first block selection.
//!
//! Missing blocks are ranked by how many known peers hold them; the next
//! block is drawn uniformly at random among those tied at the minimum, so
//! peers working from the same view do not all pile onto the same block.

use super::block::BlockId;
use super::peer_id::PeerId;
use super::rarity::RarityMap;
use rand::prelude::IndexedRandom;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};

/// Missing blocks that at least one peer holds, with their holder counts.
/// Our own entry in `map` is ignored.
pub fn available_missing(
    owned: &BTreeSet<BlockId>,
    universe: &BTreeSet<BlockId>,
    map: &RarityMap,
    local_peer: &PeerId,
) -> BTreeMap<BlockId, usize> {
    universe
        .difference(owned)
        .filter_map(|&id| {
            let holders = map
                .iter()
                .filter(|(peer, blocks)| *peer != local_peer && blocks.contains(&id))
                .count();
            (holders > 0).then_some((id, holders))
        })
        .collect()
}

/// The missing blocks tied at the lowest non-zero holder count.
pub fn rarest_candidates(
    owned: &BTreeSet<BlockId>,
    universe: &BTreeSet<BlockId>,
    map: &RarityMap,
    local_peer: &PeerId,
) -> Vec<BlockId> {
    let available = available_missing(owned, universe, map, local_peer);
    let Some(&min) = available.values().min() else {
        return Vec::new();
    };

    available
        .into_iter()
        .filter(|&(_, count)| count == min)
        .map(|(id, _)| id)
        .collect()
}

/// Picks the next block to request.
///
/// Returns `None` when nothing is missing or no known peer holds any
/// missing block.
pub fn pick_rarest<R: Rng + ?Sized>(
    owned: &BTreeSet<BlockId>,
    universe: &BTreeSet<BlockId>,
    map: &RarityMap,
    local_peer: &PeerId,
    rng: &mut R,
) -> Option<BlockId> {
    rarest_candidates(owned, universe, map, local_peer)
        .choose(rng)
        .copied()
}
