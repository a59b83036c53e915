//! Archive base: the writer's view of the message log store

use super::error::ArchiveResult;
use crate::db::repository::{digest_entry, log_record};
use async_trait::async_trait;
use shared::models::{DigestEntry, LogRecord};
use sqlx::SqliteConnection;

/// Store operations the archive writer needs.
///
/// Implementations run inside the archiving transaction; nothing they do is
/// visible until the caller commits.
#[async_trait]
pub trait LogArchiveBase: Send {
    /// Persist the new chain head after an archive file was finalized
    async fn mark_archive_created(&mut self, entry: &DigestEntry) -> ArchiveResult<()>;

    async fn mark_record_archived(&mut self, record: &LogRecord) -> ArchiveResult<()>;

    /// Current chain head, [`DigestEntry::empty`] if nothing was archived yet
    async fn load_last_archive(&mut self) -> ArchiveResult<DigestEntry>;
}

/// [`LogArchiveBase`] over an open SQLite transaction
pub struct SqliteArchiveBase<'t> {
    conn: &'t mut SqliteConnection,
}

impl<'t> SqliteArchiveBase<'t> {
    pub fn new(conn: &'t mut SqliteConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl<'t> LogArchiveBase for SqliteArchiveBase<'t> {
    async fn mark_archive_created(&mut self, entry: &DigestEntry) -> ArchiveResult<()> {
        tracing::debug!(file_name = %entry.file_name, digest = %entry.digest_hex(), "Saving chain head");
        digest_entry::replace(self.conn, entry).await?;
        Ok(())
    }

    async fn mark_record_archived(&mut self, record: &LogRecord) -> ArchiveResult<()> {
        tracing::trace!(kind = %record.kind(), id = record.id, "Setting record archived");
        log_record::mark_archived(self.conn, record.id).await?;
        Ok(())
    }

    async fn load_last_archive(&mut self) -> ArchiveResult<DigestEntry> {
        Ok(digest_entry::load_last(self.conn)
            .await?
            .unwrap_or_else(DigestEntry::empty))
    }
}
