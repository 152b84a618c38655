//! Peer engine: the block protocol and the strategies that drive it.
//!
//! The wire protocol is a request-response exchange over short-lived TCP
//! connections. Every envelope is a 4-byte big-endian length followed by a
//! JSON body `{type, peer_id, payload}`; a `SEND_BLOCK` header is followed by
//! exactly `block_size` raw bytes.
//!
//! Selection and fairness live next to the protocol: [`pick_rarest`] decides
//! what to download, [`ChokingManager`] decides who may download from us.

mod block;
mod choking;
mod client;
mod error;
mod message;
mod peer_id;
mod picker;
mod rarity;
mod server;
mod transport;

pub use block::{block_range, compute_block_count, universe, BlockId};
pub use choking::{rank_unchoked, ChokeState, ChokingManager};
pub use client::PeerClient;
pub use error::{PeerError, RejectReason};
pub use message::{Envelope, Message, MessageKind, LENGTH_PREFIX_LEN};
pub use peer_id::PeerId;
pub use picker::{available_missing, pick_rarest, rarest_candidates};
pub use rarity::{RarityMap, RarityScorer, RaritySnapshot};
pub use server::{PeerServer, RequestHandler};
pub use transport::PeerTransport;
