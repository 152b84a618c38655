//! minibit peer node
//!
//! Joins a swarm through an HTTP tracker, downloads the missing blocks and
//! keeps seeding until interrupted.

use clap::Parser;
use minibit::node::{Node, NodeConfig, NodeError};
use minibit::peer::PeerId;
use minibit::tracker::HttpTracker;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// minibit - block-exchange peer node
#[derive(Parser, Debug)]
#[command(name = "minibit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML); flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Peer id (generated when absent)
    #[arg(short, long)]
    peer_id: Option<String>,

    /// Address the block server listens on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Address announced to the tracker and to peers
    #[arg(long)]
    advertise: Option<SocketAddr>,

    /// Tracker base URL
    #[arg(short, long)]
    tracker: Option<String>,

    /// Number of blocks in the shared file
    #[arg(long)]
    blocks: Option<u32>,

    /// Block size in bytes
    #[arg(long)]
    block_size: Option<usize>,

    /// Directory for block records
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Local copy of the file, used to materialize granted blocks
    #[arg(long)]
    source: Option<PathBuf>,

    /// Where to write the reassembled file once complete
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seed for every random choice of the node
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn into_config(self) -> Result<NodeConfig, NodeError> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_toml_file(path)?,
            None => NodeConfig::default(),
        };

        if let Some(peer_id) = self.peer_id {
            config.peer_id = PeerId::from(peer_id);
        }
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if self.advertise.is_some() {
            config.advertise_addr = self.advertise;
        }
        if let Some(tracker) = self.tracker {
            config.tracker_url = tracker;
        }
        if let Some(blocks) = self.blocks {
            config.total_blocks = blocks;
        }
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if self.source.is_some() {
            config.source_file = self.source;
        }
        if self.output.is_some() {
            config.output_file = self.output;
        }
        if self.seed.is_some() {
            config.rng_seed = self.seed;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.into_config()?;
    let tracker = Arc::new(HttpTracker::new(&config.tracker_url)?);
    let node = Node::start(config, tracker).await?;
    info!(
        peer = %node.peer_id(),
        addr = %node.advertise_addr(),
        "node running, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c().await?;
    match node.shutdown().await {
        Ok(()) => {}
        Err(NodeError::Incomplete { owned, total }) => {
            warn!(owned, total, "download incomplete, press Ctrl+C again to force shutdown");
            tokio::signal::ctrl_c().await?;
            node.shutdown_now().await;
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
