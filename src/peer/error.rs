use std::fmt;

use thiserror::Error;

use super::block::BlockId;
use super::message::MessageKind;

/// Reason carried by an `ERROR` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The responder is not uploading to us right now.
    Choked,
    /// The responder does not own the requested block.
    NotFound,
    /// Any other reason string.
    Other(String),
}

impl RejectReason {
    pub fn as_str(&self) -> &str {
        match self {
            RejectReason::Choked => "choked",
            RejectReason::NotFound => "not_found",
            RejectReason::Other(reason) => reason,
        }
    }

    pub fn from_message(message: &str) -> Self {
        match message {
            "choked" => RejectReason::Choked,
            "not_found" => RejectReason::NotFound,
            other => RejectReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during peer communication.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error (unreachable, reset).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before the exchange completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("timeout")]
    Timeout,

    /// Received a malformed envelope.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A length prefix or declared payload size exceeds the wire limits.
    #[error("message too large: {0} bytes")]
    MessageTooLarge(u64),

    /// A well-formed message that is not valid at this point of the exchange.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(MessageKind),

    /// The responder sent a different block than the one requested.
    #[error("block mismatch: requested {requested}, received {received}")]
    BlockMismatch {
        requested: BlockId,
        received: BlockId,
    },

    /// The remote peer answered with an `ERROR` message.
    #[error("rejected: {0}")]
    Rejected(RejectReason),

    /// Error encoding an envelope body.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PeerError {
    /// The rejection reason, if the remote peer refused the request.
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            PeerError::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    /// True for failures to reach or keep talking to the remote peer.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            PeerError::Io(_) | PeerError::ConnectionClosed | PeerError::Timeout
        )
    }

    /// True for framing and message-level violations.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            PeerError::InvalidMessage(_)
                | PeerError::MessageTooLarge(_)
                | PeerError::UnexpectedMessage(_)
                | PeerError::BlockMismatch { .. }
                | PeerError::Json(_)
        )
    }
}
