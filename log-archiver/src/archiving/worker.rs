//! Log Archiver - 消息日志归档工作者
//!
//! A single-consumer state machine driven by a one-slot trigger channel:
//!
//! ```text
//! Idle/Failed --trigger--> Archiving --(no work)--> Idle
//!                              |
//!                              +--(error)--> Failed
//! ```
//!
//! Each cycle selects a batch, writes it into one archive file, flags the
//! records and updates the chain head inside one SQLite transaction, then
//! runs the transfer command after the commit. Cycles repeat until the
//! selection comes back empty.

use super::base::SqliteArchiveBase;
use super::error::ArchiveResult;
use super::selector::{self, MAX_RECORDS_IN_ARCHIVE};
use super::transfer::TransferInvoker;
use super::writer::{FinalizedArchive, LogArchiveWriter, ensure_writable_dir};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Opaque start-archiving signal
#[derive(Debug, Clone, Copy)]
pub struct ArchiveSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiverState {
    Idle,
    Archiving,
    /// Last run aborted; behaves like `Idle` for the next trigger
    Failed,
}

/// Sending half of the trigger channel
#[derive(Debug, Clone)]
pub struct ArchiveTrigger {
    tx: mpsc::Sender<ArchiveSignal>,
}

impl ArchiveTrigger {
    /// Request an archiving run.
    ///
    /// Returns `false` when a request is already pending (coalesced) or the
    /// archiver has stopped.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(ArchiveSignal) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!("Archiving already requested, trigger coalesced");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Log archiver stopped, trigger ignored");
                false
            }
        }
    }
}

/// Archiver settings (paths, batch cap, transfer command)
#[derive(Debug, Clone)]
pub struct ArchiverSettings {
    pub archive_dir: PathBuf,
    pub working_dir: PathBuf,
    /// Batch cap, message records per archive
    pub max_records: usize,
    pub transfer: TransferInvoker,
}

impl ArchiverSettings {
    pub fn new(archive_dir: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            working_dir: working_dir.into(),
            max_records: MAX_RECORDS_IN_ARCHIVE,
            transfer: TransferInvoker::default(),
        }
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    pub fn with_transfer(mut self, transfer: TransferInvoker) -> Self {
        self.transfer = transfer;
        self
    }
}

pub struct LogArchiver {
    runner: Runner,
    trigger_tx: mpsc::Sender<ArchiveSignal>,
    trigger_rx: mpsc::Receiver<ArchiveSignal>,
}

impl LogArchiver {
    pub fn new(pool: SqlitePool, settings: ArchiverSettings) -> Self {
        // One slot: a pending request absorbs any further triggers
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (state, _) = watch::channel(ArchiverState::Idle);
        Self {
            runner: Runner {
                pool,
                settings,
                state,
            },
            trigger_tx,
            trigger_rx,
        }
    }

    pub fn settings(&self) -> &ArchiverSettings {
        &self.runner.settings
    }

    pub fn trigger(&self) -> ArchiveTrigger {
        ArchiveTrigger {
            tx: self.trigger_tx.clone(),
        }
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<ArchiverState> {
        self.runner.state.subscribe()
    }

    pub fn state(&self) -> ArchiverState {
        *self.runner.state.borrow()
    }

    /// Run until `shutdown` is cancelled or every [`ArchiveTrigger`] is dropped
    pub async fn run(self, shutdown: CancellationToken) {
        let LogArchiver {
            runner: archiver,
            trigger_tx,
            mut trigger_rx,
        } = self;
        drop(trigger_tx);

        tracing::info!(
            archive_dir = %archiver.settings.archive_dir.display(),
            working_dir = %archiver.settings.working_dir.display(),
            max_records = archiver.settings.max_records,
            "Log archiver started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Log archiver received shutdown signal");
                    break;
                }
                signal = trigger_rx.recv() => {
                    match signal {
                        Some(ArchiveSignal) => {
                            archiver.handle_archive().await;
                            // Triggers that arrived while archiving are no-ops
                            while trigger_rx.try_recv().is_ok() {}
                        }
                        None => {
                            tracing::info!("Trigger channel closed, shutting down log archiver");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Archive everything currently eligible, outside of the run loop.
    ///
    /// Returns the archives created in this run.
    pub async fn archive_pending(&self) -> ArchiveResult<Vec<FinalizedArchive>> {
        self.runner.archive_all().await
    }
}

/// Archiving state owned by the run loop
struct Runner {
    pool: SqlitePool,
    settings: ArchiverSettings,
    state: watch::Sender<ArchiverState>,
}

impl Runner {
    async fn handle_archive(&self) {
        if let Err(e) = self.archive_all().await {
            tracing::error!(error = %e, "Error when archiving log records");
        }
    }

    /// Repeat cycles until there is nothing left to archive
    async fn archive_all(&self) -> ArchiveResult<Vec<FinalizedArchive>> {
        self.state.send_replace(ArchiverState::Archiving);
        tracing::info!("Archiving log records...");
        let started = Instant::now();

        let mut archives = Vec::new();
        loop {
            match self.archive_batch().await {
                Ok(Some(archive)) => archives.push(archive),
                Ok(None) => break,
                Err(e) => {
                    self.state.send_replace(ArchiverState::Failed);
                    return Err(e);
                }
            }
        }

        let records: usize = archives.iter().map(|a| a.record_count).sum();
        tracing::info!(
            archives = archives.len(),
            "Archived {} log records in {} ms",
            records,
            started.elapsed().as_millis()
        );

        self.state.send_replace(ArchiverState::Idle);
        Ok(archives)
    }

    /// One cycle: select, write, flag, commit, transfer
    async fn archive_batch(&self) -> ArchiveResult<Option<FinalizedArchive>> {
        let archive_dir = ensure_writable_dir(&self.settings.archive_dir, "Log output path")?;
        let working_dir = ensure_writable_dir(&self.settings.working_dir, "Log working path")?;

        let mut tx = self.pool.begin().await?;

        let records = selector::records_to_archive(&mut *tx, self.settings.max_records).await?;
        if records.is_empty() {
            tx.rollback().await?;
            return Ok(None);
        }
        tracing::debug!(count = records.len(), "Archiving batch");

        let finalized = {
            let mut base = SqliteArchiveBase::new(&mut *tx);
            let mut writer = LogArchiveWriter::open(&archive_dir, &working_dir, &mut base).await?;
            for record in &records {
                writer.write(record).await?;
            }
            writer.close().await?
        };

        let Some(finalized) = finalized else {
            tx.rollback().await?;
            return Ok(None);
        };

        if let Err(e) = tx.commit().await {
            finalized.discard();
            return Err(e.into());
        }

        self.settings.transfer.invoke_logged(&finalized.path).await;
        Ok(Some(finalized))
    }
}
