//! Log Record Repository

use super::{RepoError, RepoResult};
use shared::models::{
    LogRecord, LogRecordKind, LogRecordRow, MessageRecord, TimestampRecord,
};
use sqlx::SqliteConnection;

const SELECT_COLUMNS: &str = "SELECT id, discriminator, time, archived, query_id, message, signature, signature_hash, member_id, response, timestamp_record, timestamp_hash_chain, timestamp, hash_chain_result FROM logrecord";

fn into_records(rows: Vec<LogRecordRow>) -> RepoResult<Vec<LogRecord>> {
    rows.into_iter()
        .map(|row| LogRecord::try_from(row).map_err(RepoError::from))
        .collect()
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> RepoResult<Option<LogRecord>> {
    let row = sqlx::query_as::<_, LogRecordRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| LogRecord::try_from(r).map_err(RepoError::from))
        .transpose()
}

/// Non-archived timestamp records, oldest first
pub async fn find_unarchived_timestamps(conn: &mut SqliteConnection) -> RepoResult<Vec<LogRecord>> {
    let rows = sqlx::query_as::<_, LogRecordRow>(&format!(
        "{SELECT_COLUMNS} WHERE discriminator = ? AND archived = 0 ORDER BY id"
    ))
    .bind(LogRecordKind::Timestamp.discriminator())
    .fetch_all(&mut *conn)
    .await?;
    into_records(rows)
}

/// Non-archived message records covered by `timestamp_record_id`, at most `limit`
pub async fn find_unarchived_messages(
    conn: &mut SqliteConnection,
    timestamp_record_id: i64,
    limit: usize,
) -> RepoResult<Vec<LogRecord>> {
    let rows = sqlx::query_as::<_, LogRecordRow>(&format!(
        "{SELECT_COLUMNS} WHERE discriminator = ? AND archived = 0 AND timestamp_record = ? ORDER BY id LIMIT ?"
    ))
    .bind(LogRecordKind::Message.discriminator())
    .bind(timestamp_record_id)
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(&mut *conn)
    .await?;
    into_records(rows)
}

pub async fn count_unarchived_messages(
    conn: &mut SqliteConnection,
    timestamp_record_id: i64,
) -> RepoResult<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM logrecord WHERE discriminator = ? AND archived = 0 AND timestamp_record = ?",
    )
    .bind(LogRecordKind::Message.discriminator())
    .bind(timestamp_record_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

pub async fn mark_archived(conn: &mut SqliteConnection, id: i64) -> RepoResult<()> {
    let result = sqlx::query("UPDATE logrecord SET archived = 1 WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!("log record #{id}")));
    }
    Ok(())
}

/// Insert a message record, returning its id
pub async fn save_message(
    conn: &mut SqliteConnection,
    time: i64,
    record: &MessageRecord,
) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO logrecord (discriminator, time, archived, query_id, message, signature, signature_hash, member_id, response, timestamp_record, timestamp_hash_chain) VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) RETURNING id",
    )
    .bind(LogRecordKind::Message.discriminator())
    .bind(time)
    .bind(&record.query_id)
    .bind(&record.message)
    .bind(&record.signature)
    .bind(&record.signature_hash)
    .bind(&record.member_id)
    .bind(record.response)
    .bind(record.timestamp_record_id)
    .bind(&record.timestamp_hash_chain)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Insert a timestamp record, returning its id
pub async fn save_timestamp(
    conn: &mut SqliteConnection,
    time: i64,
    record: &TimestampRecord,
) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO logrecord (discriminator, time, archived, timestamp, hash_chain_result) VALUES (?1, ?2, 0, ?3, ?4) RETURNING id",
    )
    .bind(LogRecordKind::Timestamp.discriminator())
    .bind(time)
    .bind(&record.timestamp)
    .bind(&record.hash_chain_result)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}
