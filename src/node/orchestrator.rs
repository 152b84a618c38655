use super::config::NodeConfig;
use super::error::NodeError;
use super::roster::PeerRecord;
use super::state::{RosterDelta, SwarmState};
use crate::peer::{
    BlockId, ChokeState, ChokingManager, PeerClient, PeerId, PeerServer, RarityScorer,
    RejectReason,
};
use crate::storage::{BlockStore, SourceFile};
use crate::tracker::{Registration, Tracker};
use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Result of one download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Every block is owned; nothing was requested.
    Complete,
    /// No known peer holds a missing block.
    NothingAvailable,
    /// The block was fetched, stored and marked owned.
    Fetched(BlockId),
    /// Every holder of the block refused or failed.
    Failed(BlockId),
}

/// A running peer node.
///
/// [`Node::start`] registers with the tracker, starts the block server and
/// spawns the download, roster-refresh and choking loops. The one-shot
/// entry points ([`download_once`](Node::download_once),
/// [`refresh_once`](Node::refresh_once), [`choke_once`](Node::choke_once))
/// are what the loops call on every tick; a node created with
/// [`Node::start_passive`] runs no loops and is driven through them.
///
/// # Examples
///
/// ```no_run
/// use minibit::node::{Node, NodeConfig};
/// use minibit::tracker::HttpTracker;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = NodeConfig::new("peer_001", 20);
/// let tracker = Arc::new(HttpTracker::new(&config.tracker_url)?);
///
/// let node = Node::start(config, tracker).await?;
/// let (owned, total) = node.progress();
/// println!("{owned}/{total} blocks");
///
/// node.shutdown_now().await;
/// # Ok(())
/// # }
/// ```
pub struct Node {
    inner: Arc<NodeInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct NodeInner {
    config: NodeConfig,
    state: Arc<SwarmState>,
    tracker: Arc<dyn Tracker>,
    store: BlockStore,
    client: PeerClient,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    local_addr: SocketAddr,
    advertise_addr: SocketAddr,
    completion_reported: AtomicBool,
}

impl Node {
    /// Starts a node with its periodic loops running.
    pub async fn start(config: NodeConfig, tracker: Arc<dyn Tracker>) -> Result<Self, NodeError> {
        let node = Self::start_passive(config, tracker).await?;
        node.spawn_loops();
        Ok(node)
    }

    /// Registers and starts serving, without the periodic loops.
    pub async fn start_passive(
        config: NodeConfig,
        tracker: Arc<dyn Tracker>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let peer_id = config.peer_id.clone();

        let store = BlockStore::open(config.block_dir(), config.total_blocks).await?;

        let (choke_rng, state_rng) = match config.rng_seed {
            Some(seed) => (
                StdRng::seed_from_u64(seed),
                StdRng::seed_from_u64(seed.wrapping_add(1)),
            ),
            None => (StdRng::from_os_rng(), StdRng::from_os_rng()),
        };
        let choking = ChokingManager::new(peer_id.clone())
            .with_max_fixed(config.max_fixed_unchoked)
            .with_optimistic_interval(config.optimistic_interval())
            .with_scorer(RarityScorer::new(config.rarity_ratio))
            .with_rng(choke_rng);
        let state = Arc::new(SwarmState::new(
            peer_id.clone(),
            config.total_blocks,
            choking,
            state_rng,
        ));

        for id in store.stored_ids().await? {
            if let Some(data) = store.load(id).await? {
                state.insert_block(id, data);
            }
        }
        if state.owned_count() > 0 {
            info!(peer = %peer_id, blocks = state.owned_count(), "resumed stored blocks");
        }

        let running = Arc::new(AtomicBool::new(true));
        let server = PeerServer::bind(config.listen_addr, peer_id.clone(), running.clone())
            .await?
            .with_io_timeout(config.request_timeout());
        let local_addr = server.local_addr()?;
        let advertise_addr = config.resolve_advertise_addr(local_addr);

        let registration = Registration::new(peer_id.clone(), advertise_addr, &state.owned_ids());
        let response = tracker
            .register(&registration)
            .await
            .map_err(NodeError::Registration)?;
        info!(
            peer = %peer_id,
            addr = %advertise_addr,
            peers = response.peers.len(),
            granted = response.initial_blocks.len(),
            "registered with tracker"
        );

        seed_initial_blocks(&config, &store, &state, &response.initial_blocks).await?;

        let now = Instant::now();
        for peer in &response.peers {
            if peer.peer_id != peer_id {
                state.upsert_peer(peer.peer_id.clone(), peer.addr(), peer.blocks.iter().copied(), now);
            }
        }

        let (shutdown_tx, _) = watch::channel(false);
        let client = PeerClient::new(peer_id.clone())
            .with_timeouts(config.request_timeout(), config.announce_timeout());

        let inner = Arc::new(NodeInner {
            config,
            state: state.clone(),
            tracker,
            store,
            client,
            running,
            shutdown_tx,
            local_addr,
            advertise_addr,
            completion_reported: AtomicBool::new(false),
        });

        let server_task = server.spawn(state);
        inner.finish_if_complete().await;

        Ok(Self {
            inner,
            tasks: Mutex::new(vec![server_task]),
        })
    }

    /// Spawns the download, roster-refresh and choking loops.
    pub fn spawn_loops(&self) {
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(download_loop(self.inner.clone())));
        tasks.push(tokio::spawn(refresh_loop(self.inner.clone())));
        tasks.push(tokio::spawn(choke_loop(self.inner.clone())));
    }

    pub fn peer_id(&self) -> &PeerId {
        self.inner.state.local_peer()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn advertise_addr(&self) -> SocketAddr {
        self.inner.advertise_addr
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.inner.state.is_complete()
    }

    pub fn owned_blocks(&self) -> BTreeSet<BlockId> {
        self.inner.state.owned_ids()
    }

    /// `(owned, total)` block counts.
    pub fn progress(&self) -> (usize, usize) {
        (self.inner.state.owned_count(), self.inner.state.total_blocks())
    }

    pub fn choke_state(&self) -> ChokeState {
        self.inner.state.choke_state()
    }

    pub fn roster(&self) -> Vec<PeerRecord> {
        self.inner.state.roster()
    }

    pub fn known_peers(&self) -> BTreeSet<PeerId> {
        self.inner.state.known_peers()
    }

    /// Stores a block this node obtained out of band.
    pub async fn seed_block(&self, id: BlockId, data: Bytes) -> Result<bool, NodeError> {
        self.inner.store.save(id, &data).await?;
        let inserted = self.inner.state.insert_block(id, data);
        self.inner.finish_if_complete().await;
        Ok(inserted)
    }

    /// One tick of the download loop: fetch at most one block.
    pub async fn download_once(&self) -> Result<DownloadOutcome, NodeError> {
        self.inner.download_once().await
    }

    /// Downloads until nothing more can be fetched right now.
    pub async fn download_round(&self) -> Result<Vec<BlockId>, NodeError> {
        let mut fetched = Vec::new();
        for _ in 0..self.inner.state.total_blocks() {
            match self.inner.download_once().await? {
                DownloadOutcome::Fetched(id) => fetched.push(id),
                _ => break,
            }
        }
        Ok(fetched)
    }

    /// One tick of the choking loop.
    pub fn choke_once(&self) -> ChokeState {
        self.inner.choke_once()
    }

    /// One tick of the roster-refresh loop.
    pub async fn refresh_once(&self) -> Result<RosterDelta, NodeError> {
        self.inner.refresh_once().await
    }

    /// Sends our inventory to every known peer and waits for the
    /// deliveries. Returns how many succeeded.
    pub async fn announce_to_all(&self) -> usize {
        let targets = self.inner.state.all_targets();
        self.inner.announce(targets).await
    }

    /// Stops the node, but only once every block is owned.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        let (owned, total) = self.progress();
        if owned < total {
            warn!(
                peer = %self.peer_id(),
                owned,
                total,
                "refusing to shut down with blocks missing"
            );
            return Err(NodeError::Incomplete { owned, total });
        }
        self.shutdown_now().await;
        Ok(())
    }

    /// Stops the node regardless of progress.
    pub async fn shutdown_now(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown_tx.send_replace(true);

        if let Err(e) = self.inner.tracker.deregister(self.peer_id()).await {
            warn!(peer = %self.peer_id(), error = %e, "deregistration failed");
        }

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "node task failed");
            }
        }

        let (owned, total) = self.progress();
        info!(peer = %self.peer_id(), owned, total, "node stopped");
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.shutdown_tx.send_replace(true);
    }
}

impl NodeInner {
    fn peer_id(&self) -> &PeerId {
        self.state.local_peer()
    }

    async fn download_once(&self) -> Result<DownloadOutcome, NodeError> {
        if self.state.is_complete() {
            return Ok(DownloadOutcome::Complete);
        }

        let Some((block, holders)) = self.state.plan_download() else {
            debug!(peer = %self.peer_id(), "no missing block available");
            return Ok(DownloadOutcome::NothingAvailable);
        };

        for (holder, addr) in holders {
            match self.client.request_block(addr, block).await {
                Ok(data) => {
                    self.store.save(block, &data).await?;
                    self.state.insert_block(block, data);
                    self.state.mark_seen(&holder, Instant::now());

                    let (owned, total) = (self.state.owned_count(), self.state.total_blocks());
                    info!(peer = %self.peer_id(), block, from = %holder, owned, total, "block downloaded");

                    let targets = self.state.announce_targets(self.config.announce_fanout);
                    self.spawn_announce(targets);
                    self.finish_if_complete().await;
                    return Ok(DownloadOutcome::Fetched(block));
                }
                Err(e) if e.reject_reason() == Some(&RejectReason::Choked) => {
                    debug!(block, from = %holder, "choked by holder");
                }
                Err(e) if e.is_protocol_error() => {
                    warn!(block, from = %holder, error = %e, "protocol error from holder");
                }
                Err(e) => {
                    debug!(block, from = %holder, error = %e, "request failed");
                }
            }
        }

        debug!(peer = %self.peer_id(), block, "every holder failed");
        Ok(DownloadOutcome::Failed(block))
    }

    fn choke_once(&self) -> ChokeState {
        let state = self.state.run_choke_cycle(Instant::now());
        info!(
            peer = %self.peer_id(),
            fixed = ?state.fixed_unchoked,
            optimistic = ?state.optimistic_unchoked,
            "unchoke set updated"
        );
        state
    }

    async fn refresh_once(&self) -> Result<RosterDelta, NodeError> {
        let owned: Vec<BlockId> = self.state.owned_ids().into_iter().collect();
        let listed = self.tracker.refresh(self.peer_id(), &owned).await;

        let now = Instant::now();
        let mut delta = match &listed {
            Ok(list) => self.state.reconcile(&list.peers, now),
            Err(_) => RosterDelta::default(),
        };
        delta
            .left
            .extend(self.state.expire(now, self.config.peer_timeout()));

        for peer in &delta.joined {
            info!(peer = %self.peer_id(), joined = %peer, "peer joined");
        }
        for peer in &delta.left {
            info!(peer = %self.peer_id(), left = %peer, "peer left");
        }

        listed?;
        Ok(delta)
    }

    async fn announce(&self, targets: Vec<(PeerId, SocketAddr)>) -> usize {
        let blocks: Arc<[BlockId]> = self.state.owned_ids().into_iter().collect();
        let mut set = JoinSet::new();
        for (_, addr) in targets {
            let client = self.client.clone();
            let blocks = blocks.clone();
            let advertise = self.advertise_addr;
            set.spawn(async move {
                client
                    .try_announce_blocks(addr, &blocks, Some(advertise))
                    .await
                    .is_ok()
            });
        }

        let mut delivered = 0;
        while let Some(result) = set.join_next().await {
            if matches!(result, Ok(true)) {
                delivered += 1;
            }
        }
        delivered
    }

    fn spawn_announce(&self, targets: Vec<(PeerId, SocketAddr)>) {
        let blocks: Arc<[BlockId]> = self.state.owned_ids().into_iter().collect();
        for (_, addr) in targets {
            let client = self.client.clone();
            let blocks = blocks.clone();
            let advertise = self.advertise_addr;
            tokio::spawn(async move {
                client.announce_blocks(addr, &blocks, Some(advertise)).await;
            });
        }
    }

    /// Logs completion once and writes the output file if configured.
    async fn finish_if_complete(&self) {
        if !self.state.is_complete() || self.completion_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(peer = %self.peer_id(), blocks = self.state.total_blocks(), "download complete, seeding");

        if let Some(out) = &self.config.output_file {
            match self.store.assemble(out).await {
                Ok(bytes) => info!(path = %out.display(), bytes, "file reconstructed"),
                Err(e) => error!(path = %out.display(), error = %e, "file reconstruction failed"),
            }
        }
    }
}

/// Materializes the blocks the tracker granted on registration.
async fn seed_initial_blocks(
    config: &NodeConfig,
    store: &BlockStore,
    state: &SwarmState,
    granted: &[BlockId],
) -> Result<(), NodeError> {
    let pending: Vec<BlockId> = granted
        .iter()
        .copied()
        .filter(|id| !state.has_block(*id))
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let Some(path) = &config.source_file else {
        warn!(
            peer = %state.local_peer(),
            blocks = ?pending,
            "granted blocks have no source file, skipped"
        );
        return Ok(());
    };

    let source = SourceFile::open(path, config.block_size).await?;
    for id in pending {
        if !state.universe().contains(&id) {
            warn!(block = id, "granted block outside the file, skipped");
            continue;
        }
        match source.read_block(id).await {
            Ok(data) => {
                store.save(id, &data).await?;
                state.insert_block(id, data);
            }
            Err(e) => warn!(block = id, error = %e, "granted block unreadable, skipped"),
        }
    }

    info!(
        peer = %state.local_peer(),
        owned = state.owned_count(),
        "initial blocks seeded from source file"
    );
    Ok(())
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn download_loop(inner: Arc<NodeInner>) {
    let mut ticks = ticker(inner.config.download_interval());
    let mut shutdown = inner.shutdown_tx.subscribe();

    while inner.running.load(Ordering::Acquire) {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticks.tick() => {}
        }
        if inner.state.is_complete() {
            debug!(peer = %inner.peer_id(), "download loop finished");
            break;
        }

        // A started transfer runs to completion or to its own timeout.
        if let Err(e) = inner.download_once().await {
            warn!(peer = %inner.peer_id(), error = %e, "download tick failed");
        }
    }
}

async fn refresh_loop(inner: Arc<NodeInner>) {
    let mut ticks = ticker(inner.config.refresh_interval());
    let mut shutdown = inner.shutdown_tx.subscribe();

    // The first tick completes immediately; registration just listed peers.
    ticks.tick().await;
    while inner.running.load(Ordering::Acquire) {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticks.tick() => {}
        }

        if let Err(e) = inner.refresh_once().await {
            warn!(peer = %inner.peer_id(), error = %e, "roster refresh failed");
        }
    }
}

async fn choke_loop(inner: Arc<NodeInner>) {
    let mut ticks = ticker(inner.config.choke_interval());
    let mut shutdown = inner.shutdown_tx.subscribe();

    while inner.running.load(Ordering::Acquire) {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticks.tick() => {}
        }
        inner.choke_once();
    }
}
