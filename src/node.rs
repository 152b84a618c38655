//! The peer node: wiring between tracker, protocol, strategies and storage.
//!
//! A node owns one [`SwarmState`] behind a single lock. Three periodic
//! loops run against it concurrently:
//!
//! - **download**: pick the rarest missing block, fetch it from one of its
//!   holders, store it and announce the new inventory
//! - **roster refresh**: reconcile the roster with the tracker's live peer
//!   list and drop silent peers
//! - **choking**: rescore peers and rotate the optimistic unchoke slot
//!
//! The block server answers requests from the same state.

mod config;
mod error;
mod orchestrator;
mod roster;
mod state;

pub use config::NodeConfig;
pub use error::NodeError;
pub use orchestrator::{DownloadOutcome, Node};
pub use roster::{PeerRecord, Roster};
pub use state::{RosterDelta, SwarmState};

#[cfg(test)]
mod tests;
