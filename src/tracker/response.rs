use crate::peer::{BlockId, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};

/// What a node tells the tracker when it joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub peer_id: PeerId,
    pub ip: IpAddr,
    #[serde(rename = "porta")]
    pub port: u16,
    pub blocks: Vec<BlockId>,
}

impl Registration {
    pub fn new(peer_id: PeerId, addr: SocketAddr, blocks: &BTreeSet<BlockId>) -> Self {
        Self {
            peer_id,
            ip: addr.ip(),
            port: addr.port(),
            blocks: blocks.iter().copied().collect(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// A live peer as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerPeer {
    pub peer_id: PeerId,
    pub ip: IpAddr,
    #[serde(rename = "porta")]
    pub port: u16,
    #[serde(default)]
    pub blocks: Vec<BlockId>,
}

impl TrackerPeer {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub peers: Vec<TrackerPeer>,
    /// Blocks the tracker granted to a first-time registrant.
    #[serde(rename = "blocos_iniciais", default)]
    pub initial_blocks: Vec<BlockId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerListResponse {
    #[serde(default)]
    pub peers: Vec<TrackerPeer>,
}

#[derive(Debug, Serialize)]
pub(super) struct InventoryReport<'a> {
    pub blocks: &'a [BlockId],
}

#[derive(Debug, Serialize)]
pub(super) struct RemoveRequest<'a> {
    pub peer_id: &'a PeerId,
}
