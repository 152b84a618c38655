use super::block::BlockId;
use super::error::{PeerError, RejectReason};
use super::message::{Envelope, Message};
use super::peer_id::PeerId;
use super::transport::PeerTransport;
use crate::constants::{ANNOUNCE_TIMEOUT, REQUEST_TIMEOUT};
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Client role of the block protocol.
///
/// Every call opens a fresh connection, performs one exchange and closes it.
/// Nothing is retried here: a failed request is reported to the caller,
/// which decides whether to try another peer.
///
/// # Examples
///
/// ```no_run
/// use minibit::peer::{PeerClient, PeerId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = PeerClient::new(PeerId::from("peer_001"));
/// let data = client.request_block("127.0.0.1:8001".parse()?, 7).await?;
/// println!("block 7: {} bytes", data.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PeerClient {
    local_peer: PeerId,
    request_timeout: Duration,
    announce_timeout: Duration,
}

impl PeerClient {
    pub fn new(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            request_timeout: REQUEST_TIMEOUT,
            announce_timeout: ANNOUNCE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, request: Duration, announce: Duration) -> Self {
        self.request_timeout = request;
        self.announce_timeout = announce;
        self
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    /// Requests one block from the peer listening at `addr`.
    ///
    /// Returns exactly the bytes the peer declared in its `SEND_BLOCK`
    /// header. An `ERROR` answer becomes [`PeerError::Rejected`]. The whole
    /// exchange, connect included, is bounded by the request timeout.
    pub async fn request_block(
        &self,
        addr: SocketAddr,
        block_id: BlockId,
    ) -> Result<Bytes, PeerError> {
        timeout(self.request_timeout, self.exchange_block(addr, block_id))
            .await
            .map_err(|_| PeerError::Timeout)?
    }

    async fn exchange_block(&self, addr: SocketAddr, block_id: BlockId) -> Result<Bytes, PeerError> {
        let mut transport = PeerTransport::connect(addr, self.request_timeout).await?;

        let request = Envelope::new(self.local_peer.clone(), Message::RequestBlock { block_id });
        transport.send_envelope(&request).await?;

        let response = transport.receive_envelope().await?;
        match response.message {
            Message::SendBlock {
                block_id: received,
                block_size,
            } => {
                if received != block_id {
                    return Err(PeerError::BlockMismatch {
                        requested: block_id,
                        received,
                    });
                }
                let data = transport.receive_raw(block_size).await?;
                trace!(peer = %response.sender, block = block_id, size = data.len(), "block received");
                Ok(data)
            }
            Message::Error { message } => Err(PeerError::Rejected(RejectReason::from_message(
                &message,
            ))),
            other => Err(PeerError::UnexpectedMessage(other.kind())),
        }
    }

    /// Tells the peer at `addr` which blocks we own. Fire-and-forget: the
    /// peer sends no response.
    pub async fn try_announce_blocks(
        &self,
        addr: SocketAddr,
        blocks: &[BlockId],
        advertise: Option<SocketAddr>,
    ) -> Result<(), PeerError> {
        let mut transport = PeerTransport::connect(addr, self.announce_timeout).await?;

        let announce = Envelope::new(
            self.local_peer.clone(),
            Message::AnnounceBlocks {
                blocks: blocks.to_vec(),
                addr: advertise,
            },
        );
        transport.send_envelope(&announce).await?;
        transport.finish().await
    }

    /// Best-effort variant of [`try_announce_blocks`](Self::try_announce_blocks);
    /// failures are logged and swallowed.
    pub async fn announce_blocks(
        &self,
        addr: SocketAddr,
        blocks: &[BlockId],
        advertise: Option<SocketAddr>,
    ) {
        if let Err(e) = self.try_announce_blocks(addr, blocks, advertise).await {
            debug!(%addr, error = %e, "announce failed");
        }
    }
}
