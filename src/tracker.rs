//! Tracker collaborator.
//!
//! The tracker is the rendezvous point of the swarm: nodes register to
//! learn who else is online (and which blocks they seed with), refresh the
//! live peer list periodically and deregister when leaving. Block bytes
//! never flow through the tracker.
//!
//! - [`HttpTracker`] speaks the JSON-over-HTTP protocol of a remote tracker
//! - [`LocalTracker`] keeps the registry in memory for single-process swarms

mod error;
mod http;
mod local;
mod response;

pub use error::TrackerError;
pub use http::HttpTracker;
pub use local::LocalTracker;
pub use response::{PeerListResponse, RegisterResponse, Registration, TrackerPeer};

use crate::peer::{BlockId, PeerId};
use async_trait::async_trait;

#[async_trait]
pub trait Tracker: Send + Sync + 'static {
    /// Joins the swarm. The response lists live peers and, on a first
    /// registration, the blocks granted to this node.
    async fn register(&self, registration: &Registration) -> Result<RegisterResponse, TrackerError>;

    /// Reports our inventory and returns every other live peer.
    async fn refresh(
        &self,
        peer_id: &PeerId,
        blocks: &[BlockId],
    ) -> Result<PeerListResponse, TrackerError>;

    async fn deregister(&self, peer_id: &PeerId) -> Result<(), TrackerError>;
}

#[cfg(test)]
mod tests;
