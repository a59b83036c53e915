//! 归档链验证工具
//!
//! ```text
//! verify-archives [ARCHIVE_DIR]
//! ```
//!
//! Defaults to `ARCHIVE_PATH`. When `MESSAGELOG_DB_PATH` points to an existing
//! database its chain head is checked too. Prints a JSON report and exits
//! with status 1 if the chain is not intact.

use anyhow::Context;
use log_archiver::archiving::verify_chain;
use log_archiver::db::repository::digest_entry;
use log_archiver::{Config, DbService, init_logger};
use shared::models::DigestEntry;
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let config = Config::from_env();
    init_logger(&config.log_level);

    let archive_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.archive_path.clone());

    let head = load_head(&config).await?;
    if head.is_none() {
        tracing::warn!("No message log database found, chain head is not checked");
    }

    let result = verify_chain(&archive_dir, head.as_ref())
        .with_context(|| format!("Failed to verify archives in {}", archive_dir.display()))?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.chain_intact {
        tracing::info!(archives = result.total_archives, "Archive chain intact");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!(
            archives = result.total_archives,
            breaks = result.breaks.len(),
            "Archive chain broken"
        );
        Ok(ExitCode::FAILURE)
    }
}

async fn load_head(config: &Config) -> anyhow::Result<Option<DigestEntry>> {
    if !config.db_path.is_file() {
        return Ok(None);
    }

    let db = DbService::open_read_only(&config.db_path).await?;
    let mut conn = db.pool.acquire().await?;
    let head = digest_entry::load_last(&mut conn)
        .await?
        .unwrap_or_else(DigestEntry::empty);
    drop(conn);
    db.pool.close().await;
    Ok(Some(head))
}
