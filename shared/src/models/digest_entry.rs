//! Digest Entry Model (哈希链头)

use serde::{Deserialize, Serialize};

/// Digest and file name of the most recently written archive.
///
/// The empty entry (no digest, no file name) seeds the very first archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct DigestEntry {
    pub digest: Vec<u8>,
    pub file_name: String,
}

impl DigestEntry {
    pub fn new(digest: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self {
            digest,
            file_name: file_name.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.digest.is_empty() && self.file_name.is_empty()
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}
