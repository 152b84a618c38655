//! minibit - A small block-exchange swarm engine
//!
//! Nodes split a file into fixed-size blocks and trade them directly over
//! TCP. A tracker introduces peers to each other; everything else is
//! peer-to-peer: each node downloads the rarest blocks first and uploads to
//! the peers that hold the most rare blocks (tit-for-tat), plus one peer on
//! trial (optimistic unchoke).
//!
//! # Modules
//!
//! - [`peer`] - Block protocol, rarest-first picker, rarity scorer, choking
//! - [`storage`] - Content-verified block records on disk
//! - [`tracker`] - Tracker collaborator (HTTP client and in-process registry)
//! - [`node`] - The node orchestrator and its periodic loops
//! - [`constants`] - Protocol limits and tuning defaults

pub mod constants;
pub mod node;
pub mod peer;
pub mod storage;
pub mod tracker;

pub use node::{DownloadOutcome, Node, NodeConfig, NodeError};
pub use peer::{
    pick_rarest, BlockId, ChokeState, ChokingManager, Envelope, Message, PeerClient,
    PeerError, PeerId, PeerServer, RarityScorer,
};
pub use storage::{BlockStore, StorageError};
pub use tracker::{HttpTracker, LocalTracker, Tracker, TrackerError};
