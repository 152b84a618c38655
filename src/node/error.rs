use thiserror::Error;

use crate::peer::PeerError;
use crate::storage::StorageError;
use crate::tracker::TrackerError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// The initial tracker registration failed; the node did not start.
    #[error("registration failed: {0}")]
    Registration(#[source] TrackerError),

    /// A graceful shutdown was refused because blocks are still missing.
    #[error("download incomplete: {owned} of {total} blocks")]
    Incomplete { owned: usize, total: usize },
}
