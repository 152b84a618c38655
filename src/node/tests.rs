use super::*;
use crate::peer::{BlockId, ChokingManager, PeerId, RequestHandler};
use crate::tracker::{
    LocalTracker, PeerListResponse, RegisterResponse, Registration, Tracker, TrackerError,
    TrackerPeer,
};
use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn set(ids: &[BlockId]) -> BTreeSet<BlockId> {
    ids.iter().copied().collect()
}

fn tracker_peer(name: &str, port: u16, blocks: &[BlockId]) -> TrackerPeer {
    TrackerPeer {
        peer_id: PeerId::from(name),
        ip: addr(port).ip(),
        port,
        blocks: blocks.to_vec(),
    }
}

fn test_state(total_blocks: u32) -> SwarmState {
    let me = PeerId::from("me");
    let choking = ChokingManager::new(me.clone()).with_rng(StdRng::seed_from_u64(1));
    SwarmState::new(me, total_blocks, choking, StdRng::seed_from_u64(2))
}

fn test_config(temp: &TempDir, name: &str, total_blocks: u32) -> NodeConfig {
    NodeConfig {
        listen_addr: addr(0),
        data_dir: temp.path().to_path_buf(),
        rng_seed: Some(9),
        ..NodeConfig::new(name, total_blocks)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn test_default_config() {
    let config = NodeConfig::default();
    assert_eq!(config.total_blocks, 20);
    assert_eq!(config.max_fixed_unchoked, 4);
    assert_eq!(config.optimistic_interval(), Duration::from_secs(10));
    assert_eq!(config.download_interval(), Duration::from_secs(1));
    assert!(config.peer_id.client_id().is_some());
    config.validate().unwrap();
}

#[test]
fn test_partial_toml_override() {
    let config = NodeConfig::from_toml_str(
        r#"
        peer_id = "peer_007"
        listen_addr = "127.0.0.1:8007"
        total_blocks = 8
        choke_interval_ms = 2500
        rng_seed = 42
        "#,
    )
    .unwrap();

    assert_eq!(config.peer_id, PeerId::from("peer_007"));
    assert_eq!(config.listen_addr, addr(8007));
    assert_eq!(config.total_blocks, 8);
    assert_eq!(config.choke_interval(), Duration::from_millis(2500));
    assert_eq!(config.rng_seed, Some(42));
    assert_eq!(config.announce_fanout, 3);
}

#[test]
fn test_config_toml_file_roundtrip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("node.toml");
    let config = NodeConfig::new("peer_003", 12);
    std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

    let loaded = NodeConfig::from_toml_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_invalid_config() {
    let bad = [
        NodeConfig {
            total_blocks: 0,
            ..NodeConfig::default()
        },
        NodeConfig {
            block_size: 0,
            ..NodeConfig::default()
        },
        NodeConfig {
            max_fixed_unchoked: 0,
            ..NodeConfig::default()
        },
        NodeConfig {
            rarity_ratio: 1.5,
            ..NodeConfig::default()
        },
        NodeConfig {
            download_interval_ms: 0,
            ..NodeConfig::default()
        },
        NodeConfig {
            tracker_url: "localhost:5000".into(),
            ..NodeConfig::default()
        },
    ];
    for config in bad {
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }
    assert!(matches!(
        NodeConfig::from_toml_str("total_blocks = \"many\""),
        Err(NodeError::Config(_))
    ));
}

#[test]
fn test_advertise_addr_resolution() {
    let config = NodeConfig::default();
    assert_eq!(
        config.resolve_advertise_addr("0.0.0.0:8123".parse().unwrap()),
        addr(8123)
    );
    assert_eq!(
        config.resolve_advertise_addr("10.1.2.3:8123".parse().unwrap()),
        "10.1.2.3:8123".parse::<SocketAddr>().unwrap()
    );

    let pinned = NodeConfig {
        advertise_addr: Some(addr(9000)),
        ..NodeConfig::default()
    };
    assert_eq!(pinned.resolve_advertise_addr(addr(1)), addr(9000));
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

#[test]
fn test_roster_ignores_local_peer() {
    let mut roster = Roster::new(PeerId::from("me"));
    assert!(!roster.upsert(PeerId::from("me"), addr(1), [0], Instant::now()));
    assert!(roster.is_empty());
}

#[test]
fn test_roster_upsert_merges_inventory() {
    let mut roster = Roster::new(PeerId::from("me"));
    let now = Instant::now();

    assert!(roster.upsert(PeerId::from("a"), addr(1), [0, 1], now));
    assert!(!roster.upsert(PeerId::from("a"), addr(2), [3], now));
    assert!(roster.merge_inventory(&PeerId::from("a"), [4], now));
    assert!(!roster.merge_inventory(&PeerId::from("ghost"), [4], now));

    let record = roster.get(&PeerId::from("a")).unwrap();
    assert_eq!(record.addr, addr(2));
    assert_eq!(record.blocks, set(&[0, 1, 3, 4]));
}

#[test]
fn test_roster_holders_and_rarity_map() {
    let mut roster = Roster::new(PeerId::from("me"));
    let now = Instant::now();
    roster.upsert(PeerId::from("a"), addr(1), [0, 1], now);
    roster.upsert(PeerId::from("b"), addr(2), [1], now);

    assert_eq!(
        roster.holders_of(1),
        vec![(PeerId::from("a"), addr(1)), (PeerId::from("b"), addr(2))]
    );
    assert!(roster.holders_of(2).is_empty());

    let map = roster.rarity_map();
    assert_eq!(map.get(&PeerId::from("b")), Some(&set(&[1])));
    assert!(!map.contains_key(&PeerId::from("me")));
}

#[test]
fn test_roster_expire() {
    let mut roster = Roster::new(PeerId::from("me"));
    let t0 = Instant::now();
    roster.upsert(PeerId::from("old"), addr(1), [], t0);
    roster.upsert(PeerId::from("fresh"), addr(2), [], t0 + Duration::from_secs(50));

    let stale = roster.expire(t0 + Duration::from_secs(61), Duration::from_secs(60));
    assert_eq!(stale, vec![PeerId::from("old")]);
    assert!(roster.contains(&PeerId::from("fresh")));
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[test]
fn test_state_insert_block() {
    let state = test_state(3);
    assert!(state.insert_block(1, Bytes::from_static(b"one")));
    assert!(!state.insert_block(1, Bytes::from_static(b"uno")));
    assert!(!state.insert_block(7, Bytes::from_static(b"seven")));

    assert_eq!(state.owned_ids(), set(&[1]));
    assert_eq!(state.block(1).unwrap().as_ref(), b"one");
    assert!(!state.is_complete());
}

#[test]
fn test_state_reconcile() {
    let state = test_state(4);
    let now = Instant::now();

    let delta = state.reconcile(
        &[
            tracker_peer("a", 1, &[0]),
            tracker_peer("b", 2, &[1]),
            tracker_peer("me", 3, &[2]),
        ],
        now,
    );
    assert_eq!(delta.joined, vec![PeerId::from("a"), PeerId::from("b")]);
    assert!(delta.left.is_empty());
    assert_eq!(state.known_peers().len(), 2);

    let delta = state.reconcile(&[tracker_peer("b", 2, &[1, 3])], now);
    assert!(delta.joined.is_empty());
    assert_eq!(delta.left, vec![PeerId::from("a")]);
    assert_eq!(state.known_peers(), [PeerId::from("b")].into_iter().collect());

    let roster = state.roster();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].blocks, set(&[1, 3]));
}

#[test]
fn test_state_plan_download() {
    let state = test_state(3);
    assert!(state.plan_download().is_none());

    let now = Instant::now();
    state.upsert_peer(PeerId::from("a"), addr(1), [0, 1], now);
    state.upsert_peer(PeerId::from("b"), addr(2), [0], now);
    state.insert_block(1, Bytes::from_static(b"one"));

    // Block 0 is the only missing block anyone holds.
    let (block, holders) = state.plan_download().unwrap();
    assert_eq!(block, 0);
    let holders: BTreeSet<PeerId> = holders.into_iter().map(|(p, _)| p).collect();
    assert_eq!(holders, [PeerId::from("a"), PeerId::from("b")].into_iter().collect());
}

#[test]
fn test_state_announce_targets() {
    let state = test_state(3);
    let now = Instant::now();
    for (i, name) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        state.upsert_peer(PeerId::from(*name), addr(10 + i as u16), [], now);
    }

    let targets = state.announce_targets(3);
    assert_eq!(targets.len(), 3);
    let distinct: BTreeSet<_> = targets.iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(distinct.len(), 3);
    assert_eq!(state.announce_targets(10).len(), 5);
}

#[test]
fn test_state_announcements() {
    let state = test_state(4);
    let now = Instant::now();
    state.upsert_peer(PeerId::from("known"), addr(1), [0], now);

    state.on_announce(PeerId::from("known"), set(&[2]), None);
    state.on_announce(PeerId::from("anonymous"), set(&[1]), None);
    state.on_announce(PeerId::from("newcomer"), set(&[3]), Some(addr(2)));
    state.on_announce(PeerId::from("me"), set(&[3]), Some(addr(3)));

    let roster = state.roster();
    let ids: Vec<&str> = roster.iter().map(|r| r.peer_id.as_str()).collect();
    assert_eq!(ids, vec!["known", "newcomer"]);
    assert_eq!(roster[0].blocks, set(&[0, 2]));
    assert!(state.known_peers().contains(&PeerId::from("newcomer")));
}

#[test]
fn test_state_serves_only_unchoked() {
    let state = test_state(2);
    state.insert_block(0, Bytes::from_static(b"zero"));
    state.upsert_peer(PeerId::from("a"), addr(1), [1], Instant::now());

    assert!(!state.is_unchoked(&PeerId::from("a")));
    let choke = state.run_choke_cycle(Instant::now());
    assert!(choke.is_unchoked(&PeerId::from("a")));
    assert!(state.is_unchoked(&PeerId::from("a")));
}

// ---------------------------------------------------------------------------
// Node lifecycle
// ---------------------------------------------------------------------------

struct UnreachableTracker;

#[async_trait]
impl Tracker for UnreachableTracker {
    async fn register(&self, _: &Registration) -> Result<RegisterResponse, TrackerError> {
        Err(TrackerError::Status(503))
    }

    async fn refresh(&self, _: &PeerId, _: &[BlockId]) -> Result<PeerListResponse, TrackerError> {
        Err(TrackerError::Status(503))
    }

    async fn deregister(&self, _: &PeerId) -> Result<(), TrackerError> {
        Err(TrackerError::Status(503))
    }
}

#[tokio::test]
async fn test_registration_failure_is_fatal() {
    let temp = TempDir::new().unwrap();
    let result = Node::start(test_config(&temp, "lonely", 4), Arc::new(UnreachableTracker)).await;
    assert!(matches!(result, Err(NodeError::Registration(_))));
}

#[tokio::test]
async fn test_invalid_config_rejected_at_start() {
    let temp = TempDir::new().unwrap();
    let config = NodeConfig {
        total_blocks: 0,
        ..test_config(&temp, "broken", 4)
    };
    let result = Node::start(config, Arc::new(LocalTracker::new())).await;
    assert!(matches!(result, Err(NodeError::Config(_))));
}

#[tokio::test]
async fn test_granted_blocks_seeded_from_source() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source.dat");
    let content: Vec<u8> = (0..40u8).collect();
    std::fs::write(&source, &content).unwrap();

    let tracker = LocalTracker::new();
    tracker.grant("seeder", [0, 2]);

    let config = NodeConfig {
        block_size: 10,
        source_file: Some(source),
        ..test_config(&temp, "seeder", 4)
    };
    let node = Node::start_passive(config, Arc::new(tracker.clone()))
        .await
        .unwrap();

    assert_eq!(node.owned_blocks(), set(&[0, 2]));
    assert_eq!(node.progress(), (2, 4));
    let stored = std::fs::read(temp.path().join("seeder/block_2.bin")).unwrap();
    assert_eq!(stored, content[20..30].to_vec());

    node.shutdown_now().await;
    assert!(tracker.peers().is_empty());
}

#[tokio::test]
async fn test_granted_blocks_without_source_are_not_claimed() {
    let temp = TempDir::new().unwrap();
    let tracker = LocalTracker::new();
    tracker.grant("nosource", [1]);

    let node = Node::start_passive(test_config(&temp, "nosource", 4), Arc::new(tracker))
        .await
        .unwrap();
    assert!(node.owned_blocks().is_empty());
    node.shutdown_now().await;
}

#[tokio::test]
async fn test_shutdown_refused_while_incomplete() {
    let temp = TempDir::new().unwrap();
    let tracker = LocalTracker::new();
    let node = Node::start(test_config(&temp, "partial", 2), Arc::new(tracker.clone()))
        .await
        .unwrap();

    node.seed_block(0, Bytes::from_static(b"half")).await.unwrap();
    assert!(matches!(
        node.shutdown().await,
        Err(NodeError::Incomplete { owned: 1, total: 2 })
    ));
    assert!(node.is_running());

    node.seed_block(1, Bytes::from_static(b"rest")).await.unwrap();
    assert!(node.is_complete());
    node.shutdown().await.unwrap();
    assert!(!node.is_running());
    assert!(tracker.peers().is_empty());
}

#[tokio::test]
async fn test_restart_resumes_stored_blocks() {
    let temp = TempDir::new().unwrap();
    let tracker = LocalTracker::new();

    let node = Node::start_passive(test_config(&temp, "resumer", 3), Arc::new(tracker.clone()))
        .await
        .unwrap();
    node.seed_block(2, Bytes::from_static(b"two")).await.unwrap();
    node.shutdown_now().await;

    let node = Node::start_passive(test_config(&temp, "resumer", 3), Arc::new(tracker.clone()))
        .await
        .unwrap();
    assert_eq!(node.owned_blocks(), set(&[2]));
    assert_eq!(
        tracker.blocks_of(&PeerId::from("resumer")),
        Some(set(&[2]))
    );
    node.shutdown_now().await;
}

#[tokio::test]
async fn test_output_file_written_on_completion() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out/assembled.dat");
    let config = NodeConfig {
        output_file: Some(out.clone()),
        ..test_config(&temp, "assembler", 2)
    };
    let node = Node::start_passive(config, Arc::new(LocalTracker::new()))
        .await
        .unwrap();

    node.seed_block(1, Bytes::from_static(b"world")).await.unwrap();
    assert!(!out.exists());
    node.seed_block(0, Bytes::from_static(b"hello ")).await.unwrap();

    assert_eq!(std::fs::read(&out).unwrap(), b"hello world");
    node.shutdown_now().await;
}

/// Registers normally, then fails every refresh once `failing` is set.
struct FlakyTracker {
    inner: LocalTracker,
    failing: AtomicBool,
}

impl FlakyTracker {
    fn new(inner: LocalTracker) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    fn go_down(&self) {
        self.failing.store(true, Ordering::Release);
    }
}

#[async_trait]
impl Tracker for FlakyTracker {
    async fn register(&self, registration: &Registration) -> Result<RegisterResponse, TrackerError> {
        self.inner.register(registration).await
    }

    async fn refresh(
        &self,
        peer_id: &PeerId,
        blocks: &[BlockId],
    ) -> Result<PeerListResponse, TrackerError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(TrackerError::Status(503));
        }
        self.inner.refresh(peer_id, blocks).await
    }

    async fn deregister(&self, peer_id: &PeerId) -> Result<(), TrackerError> {
        self.inner.deregister(peer_id).await
    }
}

#[tokio::test]
async fn test_tracker_outage_after_registration() {
    let temp = TempDir::new().unwrap();
    let registry = LocalTracker::new();
    let flaky = Arc::new(FlakyTracker::new(registry.clone()));

    let config = NodeConfig {
        peer_timeout_ms: 100,
        ..test_config(&temp, "survivor", 2)
    };
    let node = Node::start_passive(config, flaky.clone()).await.unwrap();
    node.seed_block(0, Bytes::from_static(b"kept")).await.unwrap();
    let other = Node::start_passive(test_config(&temp, "neighbor", 2), Arc::new(registry.clone()))
        .await
        .unwrap();

    let delta = node.refresh_once().await.unwrap();
    assert_eq!(delta.joined, vec![PeerId::from("neighbor")]);

    flaky.go_down();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Stale records still expire while the tracker is down.
    let result = node.refresh_once().await;
    assert!(matches!(result, Err(NodeError::Tracker(_))));
    assert!(node.roster().is_empty());
    assert!(node.is_running());

    // The next tick retries and fails the same way without side effects.
    assert!(matches!(node.refresh_once().await, Err(NodeError::Tracker(_))));
    assert!(node.is_running());

    // The server keeps answering: an unknown requester is choked.
    let client = crate::peer::PeerClient::new(PeerId::from("stranger"));
    let err = client.request_block(node.local_addr(), 0).await.unwrap_err();
    assert_eq!(err.reject_reason(), Some(&crate::peer::RejectReason::Choked));

    other.shutdown_now().await;
    node.shutdown_now().await;
}

#[tokio::test]
async fn test_shutdown_lets_inflight_download_finish() {
    use crate::peer::{Envelope, Message, PeerTransport};
    use tokio::net::TcpListener;

    let temp = TempDir::new().unwrap();
    let tracker = LocalTracker::new();

    // A holder that stalls between the SEND_BLOCK header and the payload.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let holder_addr = listener.local_addr().unwrap();
    let (header_sent_tx, header_sent_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut transport = PeerTransport::new(stream, Duration::from_secs(5));
        let request = transport.receive_envelope().await.unwrap();
        assert_eq!(request.message, Message::RequestBlock { block_id: 0 });

        let header = Envelope::new(
            PeerId::from("slow_holder"),
            Message::SendBlock {
                block_id: 0,
                block_size: 9,
            },
        )
        .encode()
        .unwrap();
        transport.send_raw(&header).await.unwrap();
        let _ = header_sent_tx.send(());
        tokio::time::sleep(Duration::from_millis(800)).await;
        transport.send_raw(b"late-data").await.unwrap();
        transport.finish().await.unwrap();
    });
    tracker
        .register(&Registration::new(
            PeerId::from("slow_holder"),
            holder_addr,
            &set(&[0]),
        ))
        .await
        .unwrap();

    let config = NodeConfig {
        download_interval_ms: 20,
        request_timeout_ms: 2_000,
        ..test_config(&temp, "patient", 1)
    };
    let node = Node::start(config, Arc::new(tracker.clone())).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), header_sent_rx)
        .await
        .unwrap()
        .unwrap();
    node.shutdown_now().await;

    assert!(!node.is_running());
    assert_eq!(node.owned_blocks(), set(&[0]));
    let stored = std::fs::read(temp.path().join("patient/block_0.bin")).unwrap();
    assert_eq!(stored, b"late-data");
}
