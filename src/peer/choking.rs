use super::block::BlockId;
use super::peer_id::PeerId;
use super::rarity::{RarityMap, RarityScorer, RaritySnapshot};
use crate::constants::{MAX_FIXED_UNCHOKED, OPTIMISTIC_UNCHOKE_INTERVAL};
use rand::prelude::IndexedRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::debug;

/// Upload decisions after a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChokeState {
    /// Scored unchoke slots, best first.
    pub fixed_unchoked: Vec<PeerId>,
    /// The peer on trial, never also in `fixed_unchoked`.
    pub optimistic_unchoked: Option<PeerId>,
    pub last_rotation: Option<Instant>,
}

impl ChokeState {
    pub fn is_unchoked(&self, peer: &PeerId) -> bool {
        self.optimistic_unchoked.as_ref() == Some(peer) || self.fixed_unchoked.contains(peer)
    }
}

/// Tit-for-tat choking with an optimistic trial slot.
///
/// Up to `max_fixed` peers are unchoked because they hold the most rare
/// blocks; one more, drawn at random every `optimistic_interval`, is
/// unchoked on trial so newcomers get a chance to prove their worth. A
/// trial peer that scores into the fixed set is promoted and the trial slot
/// stays empty until the next rotation.
pub struct ChokingManager {
    local_peer: PeerId,
    max_fixed: usize,
    optimistic_interval: Duration,
    scorer: RarityScorer,
    known_peers: BTreeSet<PeerId>,
    fixed_unchoked: Vec<PeerId>,
    optimistic_unchoked: Option<PeerId>,
    last_rotation: Option<Instant>,
    rng: StdRng,
}

impl ChokingManager {
    pub fn new(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            max_fixed: MAX_FIXED_UNCHOKED,
            optimistic_interval: OPTIMISTIC_UNCHOKE_INTERVAL,
            scorer: RarityScorer::default(),
            known_peers: BTreeSet::new(),
            fixed_unchoked: Vec::new(),
            optimistic_unchoked: None,
            last_rotation: None,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_max_fixed(mut self, max_fixed: usize) -> Self {
        self.max_fixed = max_fixed;
        self
    }

    pub fn with_optimistic_interval(mut self, interval: Duration) -> Self {
        self.optimistic_interval = interval;
        self
    }

    pub fn with_scorer(mut self, scorer: RarityScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn peer_joined(&mut self, peer: PeerId) {
        if peer != self.local_peer {
            self.known_peers.insert(peer);
        }
    }

    pub fn peer_left(&mut self, peer: &PeerId) {
        self.known_peers.remove(peer);
        self.fixed_unchoked.retain(|p| p != peer);
        if self.optimistic_unchoked.as_ref() == Some(peer) {
            self.optimistic_unchoked = None;
        }
    }

    pub fn is_unchoked(&self, peer: &PeerId) -> bool {
        self.optimistic_unchoked.as_ref() == Some(peer) || self.fixed_unchoked.contains(peer)
    }

    pub fn unchoked_peers(&self) -> BTreeSet<PeerId> {
        self.fixed_unchoked
            .iter()
            .chain(self.optimistic_unchoked.iter())
            .cloned()
            .collect()
    }

    pub fn known_peers(&self) -> &BTreeSet<PeerId> {
        &self.known_peers
    }

    pub fn fixed_unchoked(&self) -> &[PeerId] {
        &self.fixed_unchoked
    }

    pub fn optimistic_unchoked(&self) -> Option<&PeerId> {
        self.optimistic_unchoked.as_ref()
    }

    pub fn max_fixed(&self) -> usize {
        self.max_fixed
    }

    pub fn state(&self) -> ChokeState {
        ChokeState {
            fixed_unchoked: self.fixed_unchoked.clone(),
            optimistic_unchoked: self.optimistic_unchoked.clone(),
            last_rotation: self.last_rotation,
        }
    }

    fn rotation_due(&self, now: Instant) -> bool {
        match self.last_rotation {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.optimistic_interval,
        }
    }

    /// Draws a trial peer among known peers that are neither unchoked in a
    /// fixed slot, the current trial peer, nor ourselves.
    fn draw_optimistic_candidate(&mut self) -> Option<PeerId> {
        let candidates: Vec<&PeerId> = self
            .known_peers
            .iter()
            .filter(|p| **p != self.local_peer)
            .filter(|p| !self.fixed_unchoked.contains(*p))
            .filter(|p| self.optimistic_unchoked.as_ref() != Some(*p))
            .collect();

        candidates.choose(&mut self.rng).map(|p| (*p).clone())
    }

    /// Runs one choking cycle at `now` against the current inventories.
    pub fn run_cycle(
        &mut self,
        now: Instant,
        map: &RarityMap,
        universe: &BTreeSet<BlockId>,
    ) -> ChokeState {
        let candidate = if self.rotation_due(now) {
            self.last_rotation = Some(now);
            self.draw_optimistic_candidate()
        } else {
            self.optimistic_unchoked.clone()
        };

        let snapshot = self.scorer.snapshot(map, universe, &self.local_peer);
        let (fixed, optimistic) = rank_unchoked(
            &self.fixed_unchoked,
            candidate,
            self.max_fixed,
            map,
            &snapshot,
            &self.local_peer,
        );

        self.fixed_unchoked = fixed;
        self.optimistic_unchoked = optimistic;

        debug!(
            peer = %self.local_peer,
            fixed = ?self.fixed_unchoked,
            optimistic = ?self.optimistic_unchoked,
            "choke cycle complete"
        );

        self.state()
    }
}

/// Scores the current fixed peers plus the trial candidate and keeps the
/// best `max_fixed`. Ties keep their previous order, with the candidate
/// ranked after the incumbents. The candidate stays on trial only if it was
/// not promoted.
pub fn rank_unchoked(
    fixed: &[PeerId],
    candidate: Option<PeerId>,
    max_fixed: usize,
    map: &RarityMap,
    snapshot: &RaritySnapshot,
    local_peer: &PeerId,
) -> (Vec<PeerId>, Option<PeerId>) {
    let candidate = candidate.filter(|c| c != local_peer);

    let mut evaluated: Vec<PeerId> = fixed.iter().filter(|p| *p != local_peer).cloned().collect();
    if let Some(c) = &candidate {
        if !evaluated.contains(c) {
            evaluated.push(c.clone());
        }
    }

    let mut scored: Vec<(PeerId, usize)> = evaluated
        .into_iter()
        .map(|peer| {
            let score = map.get(&peer).map_or(0, |blocks| snapshot.score(blocks));
            (peer, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    let new_fixed: Vec<PeerId> = scored
        .into_iter()
        .take(max_fixed)
        .map(|(peer, _)| peer)
        .collect();

    let optimistic = candidate.filter(|c| !new_fixed.contains(c));
    (new_fixed, optimistic)
}
