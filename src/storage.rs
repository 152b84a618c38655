//! Disk storage for block records.
//!
//! Every block is stored as its own write-once record: the bytes plus a
//! SHA-256 digest taken when the block was saved. Reads re-verify the bytes
//! against that digest, so a corrupted record reads as absent instead of
//! being served to other peers.
//!
//! # Components
//!
//! - [`BlockStore`] - Content-verified block records under a data directory
//! - [`SourceFile`] - A local file split into blocks, used for seeding
//!
//! # Examples
//!
//! ```no_run
//! use minibit::storage::BlockStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = BlockStore::open("./data/peer_001", 20).await?;
//!
//! store.save(3, b"block three").await?;
//! assert!(store.validate(3, b"block three").await?);
//!
//! let data = store.load(3).await?;
//! assert_eq!(data.as_deref(), Some(&b"block three"[..]));
//! # Ok(())
//! # }
//! ```

mod error;
mod source;
mod store;

pub use error::StorageError;
pub use source::SourceFile;
pub use store::{content_hash, BlockStore};
