use super::error::StorageError;
use crate::peer::{block_range, compute_block_count, BlockId};
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// A local file split into fixed-size blocks, used to seed initial blocks.
///
/// Block `i` covers bytes `[i * block_size, (i + 1) * block_size)`; the last
/// block may be short.
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
    block_size: usize,
    length: u64,
}

impl SourceFile {
    pub async fn open(path: impl Into<PathBuf>, block_size: usize) -> Result<Self, StorageError> {
        let path = path.into();
        let length = tokio::fs::metadata(&path).await?.len();
        Ok(Self {
            path,
            block_size,
            length,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn block_count(&self) -> u32 {
        compute_block_count(self.length, self.block_size)
    }

    pub async fn read_block(&self, id: BlockId) -> Result<Bytes, StorageError> {
        let range = block_range(id, self.block_size, self.length);
        if range.is_empty() {
            return Err(StorageError::InvalidBlockId(id));
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;

        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}
