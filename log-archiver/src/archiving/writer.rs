//! Archive writer
//!
//! Writes log records into a ZIP archive in the working directory and, on
//! close, moves the finished file into the archive directory and reports the
//! new chain head to the [`LogArchiveBase`].
//!
//! Dropping a writer without calling [`LogArchiveWriter::close`] discards the
//! in-progress file.

use super::base::LogArchiveBase;
use super::chain::{LINKING_INFO_ENTRY, LinkingInfoBuilder};
use super::error::{ArchiveError, ArchiveResult};
use rand::Rng;
use rand::distributions::Alphanumeric;
use shared::models::{DigestEntry, LogRecord};
use shared::util::compact_utc;
use std::ffi::CString;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Archive file name prefix
pub const ARCHIVE_PREFIX: &str = "mlog-";
/// Archive file extension
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Check that `path` is an existing, writable directory
pub fn ensure_writable_dir(path: &Path, label: &str) -> ArchiveResult<PathBuf> {
    let metadata = fs::metadata(path).map_err(|e| {
        ArchiveError::Configuration(format!("{label} ({}) is not accessible: {e}", path.display()))
    })?;

    if !metadata.is_dir() {
        return Err(ArchiveError::Configuration(format!(
            "{label} ({}) must be directory",
            path.display()
        )));
    }

    if let Err(e) = check_access(path) {
        return Err(ArchiveError::Configuration(format!(
            "{label} ({}) must be writable: {e}",
            path.display()
        )));
    }

    Ok(path.to_path_buf())
}

/// Ask the kernel whether files can be created in `dir` by this process.
///
/// Mode bits alone miss ownership, ACLs and read-only mounts.
fn check_access(dir: &Path) -> std::io::Result<()> {
    let c_path = CString::new(dir.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidInput, e))?;
    // SAFETY: `c_path` is a valid NUL-terminated string for the whole call
    let rc = unsafe { libc::access(c_path.as_ptr(), libc::W_OK | libc::X_OK) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// An archive file that has been moved into the archive directory
#[derive(Debug, Clone)]
pub struct FinalizedArchive {
    pub path: PathBuf,
    /// Chain head produced by this archive
    pub entry: DigestEntry,
    pub record_count: usize,
}

impl FinalizedArchive {
    /// Remove the file again (used when the surrounding transaction fails)
    pub fn discard(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::warn!(path = %self.path.display(), "Discarded uncommitted archive file"),
            Err(e) => tracing::error!(
                path = %self.path.display(),
                error = %e,
                "Failed to discard uncommitted archive file"
            ),
        }
    }
}

pub struct LogArchiveWriter<'b, B: LogArchiveBase + ?Sized> {
    archive_dir: PathBuf,
    working_dir: PathBuf,
    base: &'b mut B,
    last_archive: DigestEntry,
    current: Option<WorkingArchive>,
}

impl<'b, B: LogArchiveBase + ?Sized> LogArchiveWriter<'b, B> {
    /// Validate both directories and load the chain head from `base`
    pub async fn open(
        archive_dir: impl AsRef<Path>,
        working_dir: impl AsRef<Path>,
        base: &'b mut B,
    ) -> ArchiveResult<Self> {
        let archive_dir = ensure_writable_dir(archive_dir.as_ref(), "Log output path")?;
        let working_dir = ensure_writable_dir(working_dir.as_ref(), "Log working path")?;
        let last_archive = base.load_last_archive().await?;

        tracing::debug!(
            prev_file = %last_archive.file_name,
            prev_digest = %last_archive.digest_hex(),
            "Archive writer opened"
        );

        Ok(Self {
            archive_dir,
            working_dir,
            base,
            last_archive,
            current: None,
        })
    }

    /// Chain head this writer links to
    pub fn last_archive(&self) -> &DigestEntry {
        &self.last_archive
    }

    /// Append one record and mark it archived
    pub async fn write(&mut self, record: &LogRecord) -> ArchiveResult<()> {
        let archive = match self.current.take() {
            Some(archive) => archive,
            None => WorkingArchive::create(&self.working_dir, self.last_archive.clone())?,
        };
        self.current.insert(archive).append(record)?;
        self.base.mark_record_archived(record).await
    }

    /// Finalize the archive file.
    ///
    /// Returns `None` (and creates no chain entry) if nothing was written.
    pub async fn close(mut self) -> ArchiveResult<Option<FinalizedArchive>> {
        let Some(mut archive) = self.current.take() else {
            return Ok(None);
        };

        let finalized = archive.finish(&self.archive_dir)?;

        if let Err(e) = self.base.mark_archive_created(&finalized.entry).await {
            finalized.discard();
            return Err(e);
        }

        tracing::info!(
            file = %finalized.entry.file_name,
            records = finalized.record_count,
            digest = %finalized.entry.digest_hex(),
            "Archive file created"
        );
        Ok(Some(finalized))
    }
}

/// In-progress archive file in the working directory
struct WorkingArchive {
    path: PathBuf,
    zip: Option<ZipWriter<BufWriter<File>>>,
    linking: LinkingInfoBuilder,
    first_time: i64,
    last_time: i64,
    finished: bool,
}

impl WorkingArchive {
    fn create(working_dir: &Path, prev: DigestEntry) -> ArchiveResult<Self> {
        let path = working_dir.join(format!(".{ARCHIVE_PREFIX}{}.part", random_suffix()));
        let file = File::create(&path).map_err(|e| ArchiveError::write(&path, e))?;
        tracing::trace!(path = %path.display(), "Working archive created");

        Ok(Self {
            path,
            zip: Some(ZipWriter::new(BufWriter::new(file))),
            linking: LinkingInfoBuilder::new(prev),
            first_time: i64::MAX,
            last_time: i64::MIN,
            finished: false,
        })
    }

    fn zip(&mut self) -> ArchiveResult<&mut ZipWriter<BufWriter<File>>> {
        self.zip.as_mut().ok_or_else(|| {
            ArchiveError::write(&self.path, std::io::Error::other("archive already finished"))
        })
    }

    fn append(&mut self, record: &LogRecord) -> ArchiveResult<()> {
        let name = format!("{:05}-{}-{}.json", self.linking.len() + 1, record.kind(), record.id);
        let content = serde_json::to_vec_pretty(record)?;
        self.put_entry(&name, &content)?;

        self.linking.add_entry(name, &content);
        self.first_time = self.first_time.min(record.time);
        self.last_time = self.last_time.max(record.time);
        Ok(())
    }

    fn put_entry(&mut self, name: &str, content: &[u8]) -> ArchiveResult<()> {
        let path = self.path.clone();
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        let zip = self.zip()?;
        zip.start_file(name.to_string(), options)
            .map_err(|e| ArchiveError::container(&path, e))?;
        zip.write_all(content)
            .map_err(|e| ArchiveError::write(&path, e))
    }

    /// Write linking info, flush to disk and move into `archive_dir`
    fn finish(&mut self, archive_dir: &Path) -> ArchiveResult<FinalizedArchive> {
        let info = self.linking.build();
        self.put_entry(LINKING_INFO_ENTRY, &info.to_vec()?)?;

        let zip = self.zip.take().ok_or_else(|| {
            ArchiveError::write(&self.path, std::io::Error::other("archive already finished"))
        })?;
        let writer = zip
            .finish()
            .map_err(|e| ArchiveError::container(&self.path, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| ArchiveError::write(&self.path, e.into_error()))?;
        file.sync_all()
            .map_err(|e| ArchiveError::write(&self.path, e))?;
        drop(file);

        let file_name = format!(
            "{ARCHIVE_PREFIX}{}-{}-{}.{ARCHIVE_EXTENSION}",
            compact_utc(self.first_time),
            compact_utc(self.last_time),
            random_suffix()
        );
        let target = archive_dir.join(&file_name);
        move_into_place(&self.path, &target)?;
        self.finished = true;

        Ok(FinalizedArchive {
            path: target,
            entry: DigestEntry::new(self.linking.digest(), file_name),
            record_count: self.linking.len(),
        })
    }
}

impl Drop for WorkingArchive {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        drop(self.zip.take());
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove working archive");
        }
    }
}

/// Move `from` to `to` so that `to` only ever appears complete, then sync
/// the target directory so the new entry survives a crash.
///
/// Falls back to copy + rename only when the directories are on different
/// filesystems.
fn move_into_place(from: &Path, to: &Path) -> ArchiveResult<()> {
    match fs::rename(from, to) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::CrossesDevices => copy_into_place(from, to)?,
        Err(e) => return Err(ArchiveError::write(to, e)),
    }

    if let Err(e) = sync_parent_dir(to) {
        remove_logged(to, "Failed to remove unsynced archive file");
        return Err(ArchiveError::write(to, e));
    }
    Ok(())
}

fn copy_into_place(from: &Path, to: &Path) -> ArchiveResult<()> {
    let staging = to.with_extension("part");
    let copied = fs::copy(from, &staging)
        .and_then(|_| File::open(&staging))
        .and_then(|f| f.sync_all());
    if let Err(e) = copied {
        remove_logged(&staging, "Failed to remove staging archive");
        return Err(ArchiveError::write(&staging, e));
    }

    if let Err(e) = fs::rename(&staging, to) {
        remove_logged(&staging, "Failed to remove staging archive");
        return Err(ArchiveError::write(to, e));
    }

    // `to` is complete at this point, a leftover working file is only noise
    remove_logged(from, "Failed to remove moved working archive");
    Ok(())
}

fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) => File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

fn remove_logged(path: &Path, message: &str) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "{}", message);
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archiving::chain::{LinkingInfo, chain_digest, entry_digest};
    use async_trait::async_trait;
    use shared::models::{LogRecordBody, MessageRecord, TimestampRecord};
    use std::io::Read;

    /// In-memory archive base
    #[derive(Default)]
    pub(crate) struct MemoryArchiveBase {
        pub last: DigestEntry,
        pub archived: Vec<i64>,
        pub created: Vec<DigestEntry>,
        pub fail_mark_created: bool,
    }

    #[async_trait]
    impl LogArchiveBase for MemoryArchiveBase {
        async fn mark_archive_created(&mut self, entry: &DigestEntry) -> ArchiveResult<()> {
            if self.fail_mark_created {
                return Err(ArchiveError::HashChain("injected failure".into()));
            }
            self.last = entry.clone();
            self.created.push(entry.clone());
            Ok(())
        }

        async fn mark_record_archived(&mut self, record: &LogRecord) -> ArchiveResult<()> {
            self.archived.push(record.id);
            Ok(())
        }

        async fn load_last_archive(&mut self) -> ArchiveResult<DigestEntry> {
            Ok(self.last.clone())
        }
    }

    pub(crate) fn message(id: i64, ts: i64) -> LogRecord {
        LogRecord {
            id,
            time: 1_704_067_200_000 + id * 1000,
            archived: false,
            body: LogRecordBody::Message(MessageRecord {
                query_id: format!("q-{id}"),
                message: "<soap/>".into(),
                signature: "sig".into(),
                signature_hash: None,
                member_id: "EE/GOV/70000001".into(),
                response: id % 2 == 0,
                timestamp_record_id: Some(ts),
                timestamp_hash_chain: None,
            }),
        }
    }

    pub(crate) fn timestamp(id: i64) -> LogRecord {
        LogRecord {
            id,
            time: 1_704_067_200_000 + id * 1000,
            archived: false,
            body: LogRecordBody::Timestamp(TimestampRecord {
                timestamp: "dG9rZW4=".into(),
                hash_chain_result: None,
            }),
        }
    }

    fn dirs() -> (tempfile::TempDir, tempfile::TempDir) {
        (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap())
    }

    fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut zip = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..zip.len())
            .map(|i| {
                let mut entry = zip.by_index(i).unwrap();
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf).unwrap();
                (entry.name().to_string(), buf)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_open_rejects_missing_directory() {
        let (_archive, working) = dirs();
        let mut base = MemoryArchiveBase::default();
        let result =
            LogArchiveWriter::open("/nonexistent/archive", working.path(), &mut base).await;
        assert!(matches!(result, Err(ArchiveError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_open_rejects_file_path() {
        let (archive, working) = dirs();
        let file = archive.path().join("not-a-dir");
        File::create(&file).unwrap();
        let mut base = MemoryArchiveBase::default();
        let result = LogArchiveWriter::open(archive.path(), &file, &mut base).await;
        assert!(matches!(
            result,
            Err(ArchiveError::Configuration(msg)) if msg.contains("must be directory")
        ));
    }

    #[tokio::test]
    async fn test_close_without_records_creates_nothing() {
        let (archive, working) = dirs();
        let mut base = MemoryArchiveBase::default();
        let writer = LogArchiveWriter::open(archive.path(), working.path(), &mut base)
            .await
            .unwrap();
        assert!(writer.close().await.unwrap().is_none());
        assert!(base.created.is_empty());
        assert_eq!(fs::read_dir(archive.path()).unwrap().count(), 0);
        assert_eq!(fs::read_dir(working.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_write_and_close_produces_linked_archive() {
        let (archive, working) = dirs();
        let prev = DigestEntry::new(vec![9; 32], "mlog-previous.zip");
        let mut base = MemoryArchiveBase {
            last: prev.clone(),
            ..Default::default()
        };

        let records = vec![timestamp(1), message(2, 1), message(3, 1)];
        let mut writer = LogArchiveWriter::open(archive.path(), working.path(), &mut base)
            .await
            .unwrap();
        for r in &records {
            writer.write(r).await.unwrap();
        }
        let finalized = writer.close().await.unwrap().unwrap();

        assert_eq!(base.archived, vec![1, 2, 3]);
        assert_eq!(base.created, vec![finalized.entry.clone()]);
        assert_eq!(finalized.record_count, 3);
        assert!(finalized.path.starts_with(archive.path()));
        assert!(finalized.entry.file_name.starts_with("mlog-20240101"));
        assert_eq!(fs::read_dir(working.path()).unwrap().count(), 0);

        let entries = read_entries(&finalized.path);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].0, "00001-timestamp-1.json");
        assert_eq!(entries[3].0, LINKING_INFO_ENTRY);

        // Recompute from content + previous head
        let digests: Vec<[u8; 32]> = entries[..3].iter().map(|(_, c)| entry_digest(c)).collect();
        let recomputed = chain_digest(&prev.digest, digests.iter().map(|d| d.as_slice()));
        assert_eq!(recomputed, finalized.entry.digest);

        let info = LinkingInfo::from_slice(&entries[3].1).unwrap();
        assert_eq!(info.prev_file_name, "mlog-previous.zip");
        assert_eq!(info.digest_bytes().unwrap(), finalized.entry.digest);
    }

    #[tokio::test]
    async fn test_consecutive_archives_form_chain() {
        let (archive, working) = dirs();
        let mut base = MemoryArchiveBase::default();

        let mut heads = vec![DigestEntry::empty()];
        for batch in [vec![timestamp(1), message(2, 1)], vec![timestamp(3), message(4, 3)]] {
            let mut writer = LogArchiveWriter::open(archive.path(), working.path(), &mut base)
                .await
                .unwrap();
            assert_eq!(writer.last_archive(), heads.last().unwrap());
            for r in &batch {
                writer.write(r).await.unwrap();
            }
            heads.push(writer.close().await.unwrap().unwrap().entry);
        }

        let second = archive.path().join(&heads[2].file_name);
        let entries = read_entries(&second);
        let info = LinkingInfo::from_slice(&entries.last().unwrap().1).unwrap();
        assert_eq!(info.prev_entry().unwrap(), heads[1]);
        assert_eq!(info.recompute_digest().unwrap(), heads[2].digest);
    }

    #[tokio::test]
    async fn test_dropped_writer_discards_working_file() {
        let (archive, working) = dirs();
        let mut base = MemoryArchiveBase::default();
        {
            let mut writer = LogArchiveWriter::open(archive.path(), working.path(), &mut base)
                .await
                .unwrap();
            writer.write(&message(1, 0)).await.unwrap();
            assert_eq!(fs::read_dir(working.path()).unwrap().count(), 1);
        }
        assert_eq!(fs::read_dir(working.path()).unwrap().count(), 0);
        assert_eq!(fs::read_dir(archive.path()).unwrap().count(), 0);
        assert!(base.created.is_empty());
    }

    #[tokio::test]
    async fn test_failed_chain_update_discards_archive() {
        let (archive, working) = dirs();
        let mut base = MemoryArchiveBase {
            fail_mark_created: true,
            ..Default::default()
        };
        let mut writer = LogArchiveWriter::open(archive.path(), working.path(), &mut base)
            .await
            .unwrap();
        writer.write(&message(1, 0)).await.unwrap();
        assert!(writer.close().await.is_err());
        assert_eq!(fs::read_dir(archive.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_move_creates_no_chain_entry() {
        let (archive, working) = dirs();
        let mut base = MemoryArchiveBase::default();
        let mut writer = LogArchiveWriter::open(archive.path(), working.path(), &mut base)
            .await
            .unwrap();
        writer.write(&timestamp(1)).await.unwrap();

        // Archive directory disappears between open and close
        fs::remove_dir(archive.path()).unwrap();

        assert!(matches!(writer.close().await, Err(ArchiveError::Write { .. })));
        assert!(base.created.is_empty());
        assert_eq!(fs::read_dir(working.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_move_onto_directory_fails_without_leftovers() {
        let (archive, working) = dirs();
        let source = working.path().join(".mlog-source.part");
        fs::write(&source, b"zip bytes").unwrap();
        let target = archive.path().join("occupied");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), b"x").unwrap();

        assert!(move_into_place(&source, &target).is_err());
        assert!(source.exists());
        assert!(!archive.path().join("occupied.part").exists());
        assert_eq!(fs::read_dir(archive.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_move_into_place_renames_file() {
        let (archive, working) = dirs();
        let source = working.path().join(".mlog-source.part");
        fs::write(&source, b"zip bytes").unwrap();
        let target = archive.path().join("mlog-done.zip");

        move_into_place(&source, &target).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(&target).unwrap(), b"zip bytes");
    }

    #[test]
    fn test_read_only_directory_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        // The superuser passes every access check
        if unsafe { libc::geteuid() } == 0 {
            return;
        }

        let (archive, _working) = dirs();
        let locked = archive.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let result = ensure_writable_dir(&locked, "Log output path");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(matches!(
            result,
            Err(ArchiveError::Configuration(msg)) if msg.contains("must be writable")
        ));
    }

    #[test]
    fn test_writable_directory_is_accepted() {
        let (archive, _working) = dirs();
        let checked = ensure_writable_dir(archive.path(), "Log output path").unwrap();
        assert_eq!(checked, archive.path());
    }
}
