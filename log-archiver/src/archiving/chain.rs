//! Archive hash chain (归档哈希链)
//!
//! Every archive ends with a `linkinginfo.json` entry:
//!
//! ```text
//! digest = SHA-256(prev_digest || SHA-256(entry_1) || ... || SHA-256(entry_n))
//! ```
//!
//! `prev_digest` is the digest of the previous archive (no bytes for the
//! first archive ever written), so each archive commits to its predecessor.

use super::error::{ArchiveError, ArchiveResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::models::DigestEntry;

/// Name of the linking info entry inside an archive
pub const LINKING_INFO_ENTRY: &str = "linkinginfo.json";

/// SHA-256 of one archive entry
pub fn entry_digest(content: &[u8]) -> [u8; 32] {
    Sha256::digest(content).into()
}

/// Archive digest over a predecessor digest and ordered entry digests
pub fn chain_digest<'a, I>(prev_digest: &[u8], entry_digests: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = Sha256::new();
    hasher.update(prev_digest);
    for digest in entry_digests {
        hasher.update(digest);
    }
    hasher.finalize().to_vec()
}

/// One archive entry as listed in the linking info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedEntry {
    pub name: String,
    /// Hex encoded SHA-256
    pub digest: String,
}

/// Contents of `linkinginfo.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkingInfo {
    /// Hex digest of the previous archive, empty for the first archive
    pub prev_digest: String,
    /// File name of the previous archive, empty for the first archive
    pub prev_file_name: String,
    pub entries: Vec<LinkedEntry>,
    /// Hex digest of this archive
    pub digest: String,
}

impl LinkingInfo {
    pub fn from_slice(bytes: &[u8]) -> ArchiveResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_vec(&self) -> ArchiveResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_digest.is_empty() && self.prev_file_name.is_empty()
    }

    /// Predecessor as a chain entry
    pub fn prev_entry(&self) -> ArchiveResult<DigestEntry> {
        Ok(DigestEntry::new(
            decode_hex(&self.prev_digest, "prev_digest")?,
            self.prev_file_name.clone(),
        ))
    }

    pub fn digest_bytes(&self) -> ArchiveResult<Vec<u8>> {
        decode_hex(&self.digest, "digest")
    }

    /// Recompute the archive digest from the listed entry digests
    pub fn recompute_digest(&self) -> ArchiveResult<Vec<u8>> {
        let prev = decode_hex(&self.prev_digest, "prev_digest")?;
        let entries = self
            .entries
            .iter()
            .map(|e| decode_hex(&e.digest, &e.name))
            .collect::<ArchiveResult<Vec<_>>>()?;
        Ok(chain_digest(&prev, entries.iter().map(Vec::as_slice)))
    }
}

fn decode_hex(value: &str, field: &str) -> ArchiveResult<Vec<u8>> {
    hex::decode(value)
        .map_err(|e| ArchiveError::HashChain(format!("invalid hex in '{field}': {e}")))
}

/// Running digest of an archive being written
pub struct LinkingInfoBuilder {
    prev: DigestEntry,
    hasher: Sha256,
    entries: Vec<LinkedEntry>,
}

impl LinkingInfoBuilder {
    /// Seed the running digest with the previous chain head
    pub fn new(prev: DigestEntry) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&prev.digest);
        Self {
            prev,
            hasher,
            entries: Vec::new(),
        }
    }

    pub fn add_entry(&mut self, name: impl Into<String>, content: &[u8]) {
        let digest = entry_digest(content);
        self.hasher.update(digest);
        self.entries.push(LinkedEntry {
            name: name.into(),
            digest: hex::encode(digest),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Digest over everything added so far
    pub fn digest(&self) -> Vec<u8> {
        self.hasher.clone().finalize().to_vec()
    }

    pub fn build(&self) -> LinkingInfo {
        LinkingInfo {
            prev_digest: self.prev.digest_hex(),
            prev_file_name: self.prev.file_name.clone(),
            entries: self.entries.clone(),
            digest: hex::encode(self.digest()),
        }
    }
}
