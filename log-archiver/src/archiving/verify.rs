//! 归档链验证
//!
//! Re-reads archive files, recomputes entry digests and archive digests and
//! checks the links between archives in one directory.

use super::chain::{LINKING_INFO_ENTRY, LinkingInfo, chain_digest, entry_digest};
use super::error::{ArchiveError, ArchiveResult};
use super::writer::{ARCHIVE_EXTENSION, ARCHIVE_PREFIX};
use serde::Serialize;
use shared::models::DigestEntry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

/// One verified archive file
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveVerification {
    pub file_name: String,
    /// Predecessor stated in the linking info
    pub prev: DigestEntry,
    /// Digest stated in the linking info
    pub digest: Vec<u8>,
    pub entry_count: usize,
    pub issues: Vec<ArchiveIssue>,
}

impl ArchiveVerification {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn is_genesis(&self) -> bool {
        self.prev.is_empty()
    }
}

/// Problem found inside a single archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArchiveIssue {
    /// Listed in the linking info but not in the container
    MissingEntry { name: String },
    /// Present in the container but not listed
    UnlistedEntry { name: String },
    EntryDigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    /// Recomputed archive digest differs from the stated one
    DigestMismatch { expected: String, actual: String },
}

/// Problem in the links between archives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainBreak {
    /// Archive content does not match its own linking info
    InvalidArchive { file_name: String },
    /// File could not be opened or parsed as an archive at all
    UnreadableArchive { file_name: String, error: String },
    MissingPredecessor { file_name: String, prev_file_name: String },
    PredecessorMismatch {
        file_name: String,
        prev_file_name: String,
        expected_prev_digest: String,
        actual_prev_digest: String,
    },
    /// Several archives claim the same predecessor
    Fork { prev_file_name: String, successors: Vec<String> },
    MultipleGenesis { file_names: Vec<String> },
    /// Persisted chain head does not match any archive in the directory
    HeadMismatch {
        head_file_name: String,
        head_digest: String,
    },
}

/// Result of verifying an archive directory
#[derive(Debug, Serialize)]
pub struct ChainVerification {
    /// Archive files found, readable or not
    pub total_archives: usize,
    pub chain_intact: bool,
    pub archives: Vec<ArchiveVerification>,
    pub breaks: Vec<ChainBreak>,
}

/// Verify one archive file against its own linking info
pub fn verify_archive(path: &Path) -> ArchiveResult<ArchiveVerification> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file = File::open(path).map_err(|e| ArchiveError::write(path, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| ArchiveError::container(path, e))?;

    let mut contents: Vec<(String, Vec<u8>)> = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| ArchiveError::container(path, e))?;
        let mut buf = Vec::new();
        entry
            .read_to_end(&mut buf)
            .map_err(|e| ArchiveError::write(path, e))?;
        contents.push((entry.name().to_string(), buf));
    }

    let linking_bytes = contents
        .iter()
        .find(|(name, _)| name == LINKING_INFO_ENTRY)
        .map(|(_, bytes)| bytes.as_slice())
        .ok_or_else(|| {
            ArchiveError::HashChain(format!("{file_name}: missing {LINKING_INFO_ENTRY}"))
        })?;
    let info = LinkingInfo::from_slice(linking_bytes)?;

    let actual: HashMap<&str, &[u8]> = contents
        .iter()
        .filter(|(name, _)| name != LINKING_INFO_ENTRY)
        .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
        .collect();

    let mut issues = Vec::new();
    let mut digests = Vec::with_capacity(info.entries.len());
    for listed in &info.entries {
        match actual.get(listed.name.as_str()) {
            Some(content) => {
                let digest = entry_digest(content);
                let hex_digest = hex::encode(digest);
                if hex_digest != listed.digest {
                    issues.push(ArchiveIssue::EntryDigestMismatch {
                        name: listed.name.clone(),
                        expected: listed.digest.clone(),
                        actual: hex_digest,
                    });
                }
                digests.push(digest);
            }
            None => issues.push(ArchiveIssue::MissingEntry {
                name: listed.name.clone(),
            }),
        }
    }

    for name in actual.keys() {
        if !info.entries.iter().any(|e| e.name == *name) {
            issues.push(ArchiveIssue::UnlistedEntry {
                name: name.to_string(),
            });
        }
    }

    let prev = info.prev_entry()?;
    let stated = info.digest_bytes()?;
    let recomputed = chain_digest(&prev.digest, digests.iter().map(|d| d.as_slice()));
    if recomputed != stated {
        issues.push(ArchiveIssue::DigestMismatch {
            expected: info.digest.clone(),
            actual: hex::encode(&recomputed),
        });
    }

    Ok(ArchiveVerification {
        file_name,
        prev,
        digest: stated,
        entry_count: info.entries.len(),
        issues,
    })
}

/// Archive files in `dir`, sorted by name
pub fn list_archives(dir: &Path) -> ArchiveResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ArchiveError::write(dir, e))? {
        let path = entry.map_err(|e| ArchiveError::write(dir, e))?.path();
        let is_archive = path.is_file()
            && path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION)
            && path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with(ARCHIVE_PREFIX));
        if is_archive {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Verify every archive in `dir` and the links between them.
///
/// `head` is the persisted chain head; when given, it must name an archive in
/// the directory with the same digest.
///
/// A file that cannot be read as an archive is reported as a break and the
/// remaining files are still checked.
pub fn verify_chain(dir: &Path, head: Option<&DigestEntry>) -> ArchiveResult<ChainVerification> {
    let paths = list_archives(dir)?;

    let mut archives = Vec::with_capacity(paths.len());
    let mut breaks = Vec::new();
    let mut unreadable = HashSet::new();
    for path in &paths {
        match verify_archive(path) {
            Ok(archive) => archives.push(archive),
            Err(e) => {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                tracing::warn!(file = %file_name, error = %e, "Unreadable archive file");
                unreadable.insert(file_name.clone());
                breaks.push(ChainBreak::UnreadableArchive {
                    file_name,
                    error: e.to_string(),
                });
            }
        }
    }

    let by_name: HashMap<&str, &ArchiveVerification> = archives
        .iter()
        .map(|a| (a.file_name.as_str(), a))
        .collect();

    for archive in archives.iter().filter(|a| !a.is_valid()) {
        breaks.push(ChainBreak::InvalidArchive {
            file_name: archive.file_name.clone(),
        });
    }

    let mut successors: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    let mut genesis = Vec::new();
    for archive in &archives {
        if archive.is_genesis() {
            genesis.push(archive.file_name.clone());
            continue;
        }

        let prev_name = archive.prev.file_name.as_str();
        successors
            .entry(prev_name)
            .or_default()
            .push(archive.file_name.clone());

        match by_name.get(prev_name) {
            // already reported as unreadable
            None if unreadable.contains(prev_name) => {}
            None => breaks.push(ChainBreak::MissingPredecessor {
                file_name: archive.file_name.clone(),
                prev_file_name: prev_name.to_string(),
            }),
            Some(prev) if prev.digest != archive.prev.digest => {
                breaks.push(ChainBreak::PredecessorMismatch {
                    file_name: archive.file_name.clone(),
                    prev_file_name: prev_name.to_string(),
                    expected_prev_digest: hex::encode(&prev.digest),
                    actual_prev_digest: archive.prev.digest_hex(),
                })
            }
            Some(_) => {}
        }
    }

    for (prev_file_name, names) in successors {
        if names.len() > 1 {
            breaks.push(ChainBreak::Fork {
                prev_file_name: prev_file_name.to_string(),
                successors: names,
            });
        }
    }

    if genesis.len() > 1 {
        breaks.push(ChainBreak::MultipleGenesis { file_names: genesis });
    }

    if let Some(head) = head {
        let matches = if head.is_empty() {
            paths.is_empty()
        } else if unreadable.contains(&head.file_name) {
            true
        } else {
            by_name
                .get(head.file_name.as_str())
                .is_some_and(|a| a.digest == head.digest)
        };
        if !matches {
            breaks.push(ChainBreak::HeadMismatch {
                head_file_name: head.file_name.clone(),
                head_digest: head.digest_hex(),
            });
        }
    }

    tracing::debug!(
        archives = paths.len(),
        breaks = breaks.len(),
        "Archive chain verified"
    );

    Ok(ChainVerification {
        total_archives: paths.len(),
        chain_intact: breaks.is_empty(),
        archives,
        breaks,
    })
}
