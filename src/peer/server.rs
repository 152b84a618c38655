use super::block::BlockId;
use super::error::{PeerError, RejectReason};
use super::message::{Envelope, Message};
use super::peer_id::PeerId;
use super::transport::PeerTransport;
use crate::constants::{ACCEPT_POLL_INTERVAL, SERVE_TIMEOUT};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// What the server needs to know about the local node to answer requests.
///
/// Implementations must not block: each call is made from an async task and
/// is expected to take a lock, copy the answer out and return.
pub trait RequestHandler: Send + Sync + 'static {
    /// Whether uploads to `peer` are currently allowed.
    fn is_unchoked(&self, peer: &PeerId) -> bool;

    /// The bytes of an owned block, or `None` if it is not owned.
    fn block(&self, id: BlockId) -> Option<Bytes>;

    /// `peer` reported its inventory.
    fn on_announce(&self, peer: PeerId, blocks: BTreeSet<BlockId>, addr: Option<SocketAddr>);
}

/// Server role of the block protocol.
///
/// Connections are request-response: one envelope in, at most one response
/// out, then the connection is closed. Each connection runs in its own task
/// and a failure there never reaches the accept loop.
pub struct PeerServer {
    listener: TcpListener,
    local_peer: PeerId,
    running: Arc<AtomicBool>,
    io_timeout: Duration,
}

impl PeerServer {
    pub async fn bind(
        addr: SocketAddr,
        local_peer: PeerId,
        running: Arc<AtomicBool>,
    ) -> Result<Self, PeerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            local_peer,
            running,
            io_timeout: SERVE_TIMEOUT,
        })
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn spawn<H: RequestHandler>(self, handler: Arc<H>) -> JoinHandle<()> {
        tokio::spawn(self.run(handler))
    }

    /// Accepts connections until the running flag is cleared. The accept is
    /// polled so shutdown is observed within [`ACCEPT_POLL_INTERVAL`].
    pub async fn run<H: RequestHandler>(self, handler: Arc<H>) {
        let local_addr = self.listener.local_addr().ok();
        info!(peer = %self.local_peer, addr = ?local_addr, "peer server listening");

        while self.running.load(Ordering::Acquire) {
            let accepted = match timeout(ACCEPT_POLL_INTERVAL, self.listener.accept()).await {
                Err(_) => continue,
                Ok(accepted) => accepted,
            };

            match accepted {
                Ok((stream, remote)) => {
                    let handler = handler.clone();
                    let local_peer = self.local_peer.clone();
                    let io_timeout = self.io_timeout;
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, local_peer, handler, io_timeout).await
                        {
                            if e.is_protocol_error() {
                                warn!(%remote, error = %e, "protocol error, connection dropped");
                            } else {
                                debug!(%remote, error = %e, "connection failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }

        info!(peer = %self.local_peer, "peer server stopped");
    }
}

async fn handle_connection<H: RequestHandler>(
    stream: TcpStream,
    local_peer: PeerId,
    handler: Arc<H>,
    io_timeout: Duration,
) -> Result<(), PeerError> {
    let mut transport = PeerTransport::new(stream, io_timeout);
    let envelope = transport.receive_envelope().await?;
    let sender = envelope.sender;

    match envelope.message {
        Message::RequestBlock { block_id } => {
            if !handler.is_unchoked(&sender) {
                debug!(peer = %sender, block = block_id, "request refused, peer is choked");
                let reply = Envelope::new(local_peer, Message::reject(RejectReason::Choked));
                transport.send_envelope(&reply).await?;
                return transport.finish().await;
            }

            let Some(data) = handler.block(block_id) else {
                debug!(peer = %sender, block = block_id, "request refused, block not owned");
                let reply = Envelope::new(local_peer, Message::reject(RejectReason::NotFound));
                transport.send_envelope(&reply).await?;
                return transport.finish().await;
            };

            let header = Envelope::new(
                local_peer,
                Message::SendBlock {
                    block_id,
                    block_size: data.len() as u64,
                },
            );
            transport.send_envelope(&header).await?;
            transport.send_raw(&data).await?;
            transport.finish().await?;
            info!(peer = %sender, block = block_id, size = data.len(), "block sent");
            Ok(())
        }
        Message::AnnounceBlocks { blocks, addr } => {
            trace!(peer = %sender, count = blocks.len(), "inventory announced");
            handler.on_announce(sender, blocks.into_iter().collect(), addr);
            Ok(())
        }
        other => Err(PeerError::UnexpectedMessage(other.kind())),
    }
}
