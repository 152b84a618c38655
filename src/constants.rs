//! Protocol constants and tuning defaults.
//!
//! Every value here is a default: [`NodeConfig`](crate::node::NodeConfig)
//! exposes the ones an operator may want to change (slot counts, rarity
//! ratio, loop periods, timeouts). The wire limits are fixed.

use std::time::Duration;

// ============================================================================
// Identification
// ============================================================================

/// Prefix of generated peer identifiers (Azureus-style).
pub const CLIENT_PREFIX: &str = "-MB0001-";

/// Number of random characters appended to [`CLIENT_PREFIX`].
pub const PEER_ID_RANDOM_LEN: usize = 12;

/// User agent string for tracker requests.
pub const USER_AGENT: &str = "minibit/0.1.0";

// ============================================================================
// Addresses
// ============================================================================

/// Default peer protocol listen port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default tracker base URL.
pub const DEFAULT_TRACKER_URL: &str = "http://127.0.0.1:5000";

// ============================================================================
// File layout
// ============================================================================

/// Default number of blocks the shared file is split into.
pub const DEFAULT_TOTAL_BLOCKS: u32 = 20;

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 16 * 1024;

// ============================================================================
// Wire limits
// ============================================================================

/// Largest accepted envelope body. Envelopes are small JSON documents; the
/// block bytes travel outside them.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Largest accepted raw block payload.
pub const MAX_BLOCK_PAYLOAD: u64 = 64 * 1024 * 1024;

/// Initial capacity of a transport read buffer.
pub const READ_BUFFER_CAPACITY: usize = 32 * 1024;

// ============================================================================
// Choking
// ============================================================================

/// Peers kept in the scored (fixed) unchoke set.
pub const MAX_FIXED_UNCHOKED: usize = 4;

/// A block is rare when at most this fraction of reporting peers hold it
/// (never less than one peer).
pub const RARITY_RATIO: f64 = 0.3;

/// How often a new optimistic unchoke candidate is drawn.
pub const OPTIMISTIC_UNCHOKE_INTERVAL: Duration = Duration::from_secs(10);

/// How often the choking cycle runs.
pub const CHOKE_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// Background loops
// ============================================================================

/// How often the download loop asks the picker for a block.
pub const DOWNLOAD_INTERVAL: Duration = Duration::from_secs(1);

/// How often the roster is reconciled with the tracker.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Peers told about a freshly downloaded block.
pub const ANNOUNCE_FANOUT: usize = 3;

/// Roster entries not seen for this long are dropped.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(60);

/// Accept loop poll period; bounds how long shutdown takes to be observed.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ============================================================================
// Timeouts
// ============================================================================

/// Bound on each I/O step of a block request (connect, send, receive).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on each I/O step of an announcement.
pub const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on each I/O step of an inbound connection.
pub const SERVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on a whole tracker HTTP exchange.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
