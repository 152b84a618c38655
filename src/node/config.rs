use super::error::NodeError;
use crate::constants::{
    ANNOUNCE_FANOUT, ANNOUNCE_TIMEOUT, CHOKE_INTERVAL, DEFAULT_BLOCK_SIZE, DEFAULT_PORT,
    DEFAULT_TOTAL_BLOCKS, DEFAULT_TRACKER_URL, DOWNLOAD_INTERVAL, MAX_FIXED_UNCHOKED,
    OPTIMISTIC_UNCHOKE_INTERVAL, PEER_TIMEOUT, RARITY_RATIO, REFRESH_INTERVAL, REQUEST_TIMEOUT,
};
use crate::peer::PeerId;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings of a single node.
///
/// Every field has a default, so a TOML file only needs the values it
/// changes. Durations are integer milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub peer_id: PeerId,
    pub listen_addr: SocketAddr,
    /// Address other peers should dial. Defaults to the bound listen
    /// address, with an unspecified IP replaced by loopback.
    pub advertise_addr: Option<SocketAddr>,
    pub tracker_url: String,

    // File layout
    pub total_blocks: u32,
    pub block_size: usize,
    pub data_dir: PathBuf,
    pub source_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,

    // Choking
    pub max_fixed_unchoked: usize,
    pub rarity_ratio: f64,
    pub optimistic_interval_ms: u64,
    pub choke_interval_ms: u64,

    // Loops
    pub download_interval_ms: u64,
    pub refresh_interval_ms: u64,
    pub announce_fanout: usize,
    pub peer_timeout_ms: u64,

    // Timeouts
    pub request_timeout_ms: u64,
    pub announce_timeout_ms: u64,

    /// Seeds every random choice of the node, for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: PeerId::generate(),
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            advertise_addr: None,
            tracker_url: DEFAULT_TRACKER_URL.to_string(),
            total_blocks: DEFAULT_TOTAL_BLOCKS,
            block_size: DEFAULT_BLOCK_SIZE,
            data_dir: PathBuf::from("data"),
            source_file: None,
            output_file: None,
            max_fixed_unchoked: MAX_FIXED_UNCHOKED,
            rarity_ratio: RARITY_RATIO,
            optimistic_interval_ms: millis(OPTIMISTIC_UNCHOKE_INTERVAL),
            choke_interval_ms: millis(CHOKE_INTERVAL),
            download_interval_ms: millis(DOWNLOAD_INTERVAL),
            refresh_interval_ms: millis(REFRESH_INTERVAL),
            announce_fanout: ANNOUNCE_FANOUT,
            peer_timeout_ms: millis(PEER_TIMEOUT),
            request_timeout_ms: millis(REQUEST_TIMEOUT),
            announce_timeout_ms: millis(ANNOUNCE_TIMEOUT),
            rng_seed: None,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl NodeConfig {
    pub fn new(peer_id: impl Into<PeerId>, total_blocks: u32) -> Self {
        Self {
            peer_id: peer_id.into(),
            total_blocks,
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, NodeError> {
        toml::from_str(content).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if self.peer_id.as_str().is_empty() {
            return Err(NodeError::Config("peer_id must not be empty".into()));
        }
        if self.total_blocks == 0 {
            return Err(NodeError::Config("total_blocks must be positive".into()));
        }
        if self.block_size == 0 {
            return Err(NodeError::Config("block_size must be positive".into()));
        }
        if self.max_fixed_unchoked == 0 {
            return Err(NodeError::Config("max_fixed_unchoked must be positive".into()));
        }
        if !(self.rarity_ratio > 0.0 && self.rarity_ratio <= 1.0) {
            return Err(NodeError::Config(format!(
                "rarity_ratio must be in (0, 1], got {}",
                self.rarity_ratio
            )));
        }
        let intervals = [
            ("download_interval_ms", self.download_interval_ms),
            ("refresh_interval_ms", self.refresh_interval_ms),
            ("choke_interval_ms", self.choke_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("announce_timeout_ms", self.announce_timeout_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, ms)| *ms == 0) {
            return Err(NodeError::Config(format!("{name} must be positive")));
        }
        if !self.tracker_url.starts_with("http://") && !self.tracker_url.starts_with("https://") {
            return Err(NodeError::Config(format!(
                "tracker_url must be an http(s) url, got {}",
                self.tracker_url
            )));
        }
        Ok(())
    }

    /// Directory holding this node's block records.
    pub fn block_dir(&self) -> PathBuf {
        self.data_dir.join(self.peer_id.as_str())
    }

    /// The address announced to the tracker and to peers, given the
    /// address the listener actually bound.
    pub fn resolve_advertise_addr(&self, bound: SocketAddr) -> SocketAddr {
        if let Some(addr) = self.advertise_addr {
            return addr;
        }
        if bound.ip().is_unspecified() {
            let loopback = match bound.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
            };
            return SocketAddr::new(loopback, bound.port());
        }
        bound
    }

    pub fn optimistic_interval(&self) -> Duration {
        Duration::from_millis(self.optimistic_interval_ms)
    }

    pub fn choke_interval(&self) -> Duration {
        Duration::from_millis(self.choke_interval_ms)
    }

    pub fn download_interval(&self) -> Duration {
        Duration::from_millis(self.download_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn announce_timeout(&self) -> Duration {
        Duration::from_millis(self.announce_timeout_ms)
    }
}
