use std::fmt;
use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::block::BlockId;
use super::error::{PeerError, RejectReason};
use super::peer_id::PeerId;
use crate::constants::MAX_FRAME_SIZE;

/// Size of the big-endian length prefix in front of every envelope.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// The `type` field of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    RequestBlock,
    SendBlock,
    AnnounceBlocks,
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::RequestBlock => "REQUEST_BLOCK",
            MessageKind::SendBlock => "SEND_BLOCK",
            MessageKind::AnnounceBlocks => "ANNOUNCE_BLOCKS",
            MessageKind::Error => "ERROR",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol message.
///
/// `SendBlock` is only the header: exactly `block_size` raw bytes follow it
/// on the same connection, outside any envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RequestBlock {
        block_id: BlockId,
    },
    SendBlock {
        block_id: BlockId,
        block_size: u64,
    },
    AnnounceBlocks {
        blocks: Vec<BlockId>,
        /// Where the sender accepts connections, if it wants to be dialed.
        addr: Option<SocketAddr>,
    },
    Error {
        message: String,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::RequestBlock { .. } => MessageKind::RequestBlock,
            Message::SendBlock { .. } => MessageKind::SendBlock,
            Message::AnnounceBlocks { .. } => MessageKind::AnnounceBlocks,
            Message::Error { .. } => MessageKind::Error,
        }
    }

    pub fn reject(reason: RejectReason) -> Self {
        Message::Error {
            message: reason.as_str().to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RequestPayload {
    block_id: BlockId,
}

#[derive(Serialize, Deserialize)]
struct SendPayload {
    block_id: BlockId,
    block_size: u64,
}

#[derive(Serialize, Deserialize)]
struct AnnouncePayload {
    blocks: Vec<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    addr: Option<SocketAddr>,
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    message: String,
}

#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: MessageKind,
    peer_id: PeerId,
    #[serde(default)]
    payload: serde_json::Value,
}

/// A message together with its sender, as it travels on the wire.
///
/// The body is `{"type": ..., "peer_id": ..., "payload": {...}}` encoded as
/// JSON, preceded by a 4-byte big-endian length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: PeerId,
    pub message: Message,
}

impl Envelope {
    pub fn new(sender: PeerId, message: Message) -> Self {
        Self { sender, message }
    }

    /// Encodes the JSON body without the length prefix.
    pub fn encode_body(&self) -> Result<Vec<u8>, PeerError> {
        let payload = match &self.message {
            Message::RequestBlock { block_id } => serde_json::to_value(RequestPayload {
                block_id: *block_id,
            })?,
            Message::SendBlock {
                block_id,
                block_size,
            } => serde_json::to_value(SendPayload {
                block_id: *block_id,
                block_size: *block_size,
            })?,
            Message::AnnounceBlocks { blocks, addr } => serde_json::to_value(AnnouncePayload {
                blocks: blocks.clone(),
                addr: *addr,
            })?,
            Message::Error { message } => serde_json::to_value(ErrorPayload {
                message: message.clone(),
            })?,
        };

        let raw = RawEnvelope {
            kind: self.message.kind(),
            peer_id: self.sender.clone(),
            payload,
        };
        Ok(serde_json::to_vec(&raw)?)
    }

    /// Encodes the full frame: length prefix followed by the body.
    pub fn encode(&self) -> Result<Bytes, PeerError> {
        let body = self.encode_body()?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(PeerError::MessageTooLarge(body.len() as u64));
        }

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + body.len());
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    /// Decodes a body (the bytes after the length prefix).
    pub fn decode(body: &[u8]) -> Result<Self, PeerError> {
        let raw: RawEnvelope = serde_json::from_slice(body)
            .map_err(|e| PeerError::InvalidMessage(format!("bad envelope: {e}")))?;

        let message = match raw.kind {
            MessageKind::RequestBlock => {
                let p: RequestPayload = decode_payload(raw.kind, raw.payload)?;
                Message::RequestBlock {
                    block_id: p.block_id,
                }
            }
            MessageKind::SendBlock => {
                let p: SendPayload = decode_payload(raw.kind, raw.payload)?;
                Message::SendBlock {
                    block_id: p.block_id,
                    block_size: p.block_size,
                }
            }
            MessageKind::AnnounceBlocks => {
                let p: AnnouncePayload = decode_payload(raw.kind, raw.payload)?;
                Message::AnnounceBlocks {
                    blocks: p.blocks,
                    addr: p.addr,
                }
            }
            MessageKind::Error => {
                let p: ErrorPayload = decode_payload(raw.kind, raw.payload)?;
                Message::Error { message: p.message }
            }
        };

        Ok(Self {
            sender: raw.peer_id,
            message,
        })
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    kind: MessageKind,
    payload: serde_json::Value,
) -> Result<T, PeerError> {
    serde_json::from_value(payload)
        .map_err(|e| PeerError::InvalidMessage(format!("bad {kind} payload: {e}")))
}
