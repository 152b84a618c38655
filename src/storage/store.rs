use super::error::StorageError;
use crate::peer::BlockId;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const BLOCK_EXT: &str = "bin";
const HASH_EXT: &str = "sha256";

/// Hex-encoded SHA-256 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Write-once, content-verified block records in a single directory.
///
/// Each block lives in `block_<id>.bin` next to `block_<id>.sha256`, which
/// holds the hex digest taken when the block was saved. A record is valid
/// only while the bytes still hash to the stored digest.
#[derive(Debug, Clone)]
pub struct BlockStore {
    dir: PathBuf,
    total_blocks: u32,
}

impl BlockStore {
    /// Opens (creating if needed) the store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>, total_blocks: u32) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir, total_blocks })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    fn check_id(&self, id: BlockId) -> Result<(), StorageError> {
        if id >= self.total_blocks {
            return Err(StorageError::InvalidBlockId(id));
        }
        Ok(())
    }

    fn block_path(&self, id: BlockId) -> PathBuf {
        self.dir.join(format!("block_{id}.{BLOCK_EXT}"))
    }

    fn hash_path(&self, id: BlockId) -> PathBuf {
        self.dir.join(format!("block_{id}.{HASH_EXT}"))
    }

    /// Persists `data` under `id` with its digest.
    ///
    /// Returns `Ok(false)` without touching the disk when a valid record
    /// already exists for `id`.
    pub async fn save(&self, id: BlockId, data: &[u8]) -> Result<bool, StorageError> {
        self.check_id(id)?;

        if self.contains(id).await? {
            debug!(block = id, "block already stored");
            return Ok(false);
        }

        let digest = hash_blocking(Bytes::copy_from_slice(data)).await?;

        write_atomic(&self.block_path(id), data).await?;
        write_atomic(&self.hash_path(id), digest.as_bytes()).await?;

        debug!(block = id, size = data.len(), "block stored");
        Ok(true)
    }

    /// Whether `data` matches the digest persisted for `id`. False when no
    /// digest has been persisted.
    pub async fn validate(&self, id: BlockId, data: &[u8]) -> Result<bool, StorageError> {
        self.check_id(id)?;

        let Some(expected) = self.stored_hash(id).await? else {
            return Ok(false);
        };
        let actual = hash_blocking(Bytes::copy_from_slice(data)).await?;
        Ok(actual == expected)
    }

    /// Reads the bytes of `id`, failing with [`StorageError::MissingBlock`]
    /// when no record exists and [`StorageError::HashMismatch`] when the
    /// bytes no longer match their digest.
    pub async fn read(&self, id: BlockId) -> Result<Bytes, StorageError> {
        self.check_id(id)?;

        let Some(expected) = self.stored_hash(id).await? else {
            return Err(StorageError::MissingBlock(id));
        };
        let data = match tokio::fs::read(self.block_path(id)).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::MissingBlock(id))
            }
            Err(e) => return Err(e.into()),
        };

        verify(id, &data, &expected).await?;
        Ok(data)
    }

    /// Loads the bytes of `id`. Missing and corrupted records both read as
    /// `None`.
    pub async fn load(&self, id: BlockId) -> Result<Option<Bytes>, StorageError> {
        match self.read(id).await {
            Ok(data) => Ok(Some(data)),
            Err(StorageError::MissingBlock(_)) => Ok(None),
            Err(StorageError::HashMismatch(_)) => {
                warn!(block = id, "stored block failed verification");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a valid record exists for `id`.
    pub async fn contains(&self, id: BlockId) -> Result<bool, StorageError> {
        Ok(self.load(id).await?.is_some())
    }

    /// Ids with a valid record, scanned in order.
    pub async fn stored_ids(&self) -> Result<BTreeSet<BlockId>, StorageError> {
        let mut ids = BTreeSet::new();
        for id in 0..self.total_blocks {
            if self.contains(id).await? {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Concatenates every block in order into `out`. Returns the number of
    /// bytes written.
    pub async fn assemble(&self, out: &Path) -> Result<u64, StorageError> {
        if let Some(parent) = out.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::File::create(out).await?;
        let mut written = 0u64;
        for id in 0..self.total_blocks {
            let data = self.read(id).await?;
            file.write_all(&data).await?;
            written += data.len() as u64;
        }
        file.flush().await?;

        debug!(path = %out.display(), bytes = written, "blocks assembled");
        Ok(written)
    }

    async fn stored_hash(&self, id: BlockId) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.hash_path(id)).await {
            Ok(hash) => Ok(Some(hash.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

async fn hash_blocking(data: Bytes) -> Result<String, StorageError> {
    tokio::task::spawn_blocking(move || content_hash(&data))
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))
}

async fn verify(id: BlockId, data: &Bytes, expected: &str) -> Result<(), StorageError> {
    if hash_blocking(data.clone()).await? != expected {
        return Err(StorageError::HashMismatch(id));
    }
    Ok(())
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
