//! Digest Entry Repository (Singleton)
//!
//! 存储最近一个归档文件的摘要，作为下一个归档的哈希链种子。

use super::RepoResult;
use shared::models::DigestEntry;
use sqlx::SqliteConnection;

/// Load the chain head, if any archive has been written
pub async fn load_last(conn: &mut SqliteConnection) -> RepoResult<Option<DigestEntry>> {
    let entry = sqlx::query_as::<_, DigestEntry>(
        "SELECT digest, file_name FROM last_archive_digest ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?;
    Ok(entry)
}

/// Replace the chain head: delete the previous row, insert the new one
pub async fn replace(conn: &mut SqliteConnection, entry: &DigestEntry) -> RepoResult<()> {
    sqlx::query("DELETE FROM last_archive_digest")
        .execute(&mut *conn)
        .await?;

    sqlx::query("INSERT INTO last_archive_digest (digest, file_name) VALUES (?, ?)")
        .bind(&entry.digest)
        .bind(&entry.file_name)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
