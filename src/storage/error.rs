use thiserror::Error;

use crate::peer::BlockId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("block hash mismatch for block {0}")]
    HashMismatch(BlockId),

    #[error("invalid block id: {0}")]
    InvalidBlockId(BlockId),

    #[error("block {0} is not stored")]
    MissingBlock(BlockId),
}
