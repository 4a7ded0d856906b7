//! URL to storage key mapping

use sha2::{Digest, Sha256};
use std::fmt;

/// Sharded SHA-256 digest of a URL
///
/// The raw URL string is hashed as given; equivalent but differently
/// spelled URLs map to different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    digest: String,
}

impl CacheKey {
    pub fn from_url(url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        Self {
            digest: hex::encode(hasher.finalize()),
        }
    }

    /// Leading two hex characters, used as directory / namespace shard
    pub fn shard(&self) -> &str {
        &self.digest[..2]
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// `<shard>/<digest>`
    pub fn path(&self) -> String {
        format!("{}/{}", self.shard(), self.digest)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.shard(), self.digest)
    }
}
