//! Database Module
//!
//! Handles the message log SQLite connection pool and migrations

pub mod repository;

use repository::{RepoError, RepoResult};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;

/// Database service, owns the message log connection pool
#[derive(Clone)]
pub struct DbService {
    pub pool: SqlitePool,
}

impl DbService {
    /// Open (or create) the message log database in WAL mode and apply migrations
    pub async fn new(db_path: &Path) -> RepoResult<Self> {
        // busy_timeout: 写冲突时等待 5s 而非立即失败
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON")
            .optimize_on_close(true, None);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| RepoError::Database(format!("Failed to open database: {e}")))?;

        tracing::info!(
            path = %db_path.display(),
            "Message log database opened (SQLite WAL, busy_timeout=5000ms)"
        );

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Open an existing database for inspection only.
    ///
    /// Never creates the file and never runs migrations.
    pub async fn open_read_only(db_path: &Path) -> RepoResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .read_only(true)
            .create_if_missing(false)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| RepoError::Database(format!("Failed to open database read-only: {e}")))?;

        tracing::debug!(path = %db_path.display(), "Message log database opened read-only");
        Ok(Self { pool })
    }

    /// Single-connection in-memory database with the schema applied.
    ///
    /// The connection is never recycled, otherwise the database would vanish.
    pub async fn in_memory() -> RepoResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> RepoResult<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| RepoError::Database(format!("Failed to apply migrations: {e}")))?;
        tracing::debug!("Message log migrations applied");
        Ok(())
    }
}
