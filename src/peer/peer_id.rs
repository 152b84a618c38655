use std::fmt;

use rand::distr::Alphanumeric;
use rand::Rng as _;
use serde::{Deserialize, Serialize};

use crate::constants::{CLIENT_PREFIX, PEER_ID_RANDOM_LEN};

/// A peer identifier.
///
/// Peer ids are free-form strings agreed on through the tracker. Generated
/// ids follow the Azureus-style layout `-MB0001-<random>`, where `MB`
/// identifies minibit and `0001` is the version.
///
/// # Examples
///
/// ```
/// use minibit::peer::PeerId;
///
/// let generated = PeerId::generate();
/// assert_eq!(generated.client_id(), Some("MB0001"));
///
/// let named = PeerId::from("peer_001");
/// assert_eq!(named.as_str(), "peer_001");
/// assert_eq!(named.client_id(), None);
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generates a new random peer id with the minibit client prefix.
    pub fn generate() -> Self {
        let suffix: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(PEER_ID_RANDOM_LEN)
            .map(char::from)
            .collect();
        Self(format!("{CLIENT_PREFIX}{suffix}"))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the client identifier if the id uses the `-XXXXXX-` layout.
    pub fn client_id(&self) -> Option<&str> {
        let bytes = self.0.as_bytes();
        if bytes.len() >= 8 && bytes[0] == b'-' && bytes[7] == b'-' {
            self.0.get(1..7)
        } else {
            None
        }
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
