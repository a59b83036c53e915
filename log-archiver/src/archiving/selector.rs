//! Record selection (待归档记录选择)
//!
//! Records are grouped by timestamp record. A timestamp record is only
//! selected once none of the messages it covers is still pending, so it
//! always lands in a later archive than its last message.

use crate::db::repository::{RepoResult, log_record};
use shared::models::LogRecord;
use sqlx::SqliteConnection;

/// Default batch cap (message records per archive)
pub const MAX_RECORDS_IN_ARCHIVE: usize = 10;

/// Next records to archive, at most `max_records` message records plus the
/// timestamp records they complete. Empty means there is nothing to do.
pub async fn records_to_archive(
    conn: &mut SqliteConnection,
    max_records: usize,
) -> RepoResult<Vec<LogRecord>> {
    let mut records = Vec::new();
    let mut allowed = max_records;

    if allowed == 0 {
        return Ok(records);
    }

    for ts in log_record::find_unarchived_timestamps(conn).await? {
        let pending = log_record::count_unarchived_messages(conn, ts.id).await?;

        if pending == 0 {
            tracing::trace!(timestamp_id = ts.id, "Timestamp record will be archived");
            records.push(ts);
            continue;
        }

        tracing::trace!(
            timestamp_id = ts.id,
            pending,
            "Timestamp record still related to non-archived message records"
        );

        let messages = log_record::find_unarchived_messages(conn, ts.id, allowed).await?;
        allowed = allowed.saturating_sub(messages.len());
        records.extend(messages);

        if allowed == 0 {
            break;
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;
    use crate::db::repository::log_record::{mark_archived, save_message, save_timestamp};
    use shared::models::{LogRecordKind, MessageRecord, TimestampRecord};

    async fn timestamp(conn: &mut SqliteConnection) -> i64 {
        let record = TimestampRecord {
            timestamp: "dG9rZW4=".into(),
            hash_chain_result: None,
        };
        save_timestamp(conn, 1_000, &record).await.unwrap()
    }

    async fn message(conn: &mut SqliteConnection, ts: Option<i64>) -> i64 {
        let record = MessageRecord {
            query_id: "q".into(),
            message: "<m/>".into(),
            signature: "s".into(),
            signature_hash: None,
            member_id: "EE/COM/1".into(),
            response: false,
            timestamp_record_id: ts,
            timestamp_hash_chain: None,
        };
        save_message(conn, 900, &record).await.unwrap()
    }

    fn ids(records: &[LogRecord]) -> Vec<i64> {
        records.iter().map(|r| r.id).collect()
    }

    fn message_count(records: &[LogRecord]) -> usize {
        records
            .iter()
            .filter(|r| r.kind() == LogRecordKind::Message)
            .count()
    }

    #[tokio::test]
    async fn test_empty_store_is_no_work() {
        let db = DbService::in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();
        assert!(records_to_archive(&mut conn, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_two_timestamps_one_message_each() {
        let db = DbService::in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();

        let ts1 = timestamp(&mut conn).await;
        let mr1 = message(&mut conn, Some(ts1)).await;
        let ts2 = timestamp(&mut conn).await;
        let mr2 = message(&mut conn, Some(ts2)).await;

        let first = records_to_archive(&mut conn, 10).await.unwrap();
        assert_eq!(ids(&first), vec![mr1, mr2]);
        for r in &first {
            mark_archived(&mut conn, r.id).await.unwrap();
        }

        let second = records_to_archive(&mut conn, 10).await.unwrap();
        assert_eq!(ids(&second), vec![ts1, ts2]);
    }

    #[tokio::test]
    async fn test_batch_cap_defers_timestamp() {
        let db = DbService::in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();

        let ts = timestamp(&mut conn).await;
        for _ in 0..15 {
            message(&mut conn, Some(ts)).await;
        }

        let first = records_to_archive(&mut conn, 10).await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(message_count(&first), 10);
        assert!(!ids(&first).contains(&ts));
        for r in &first {
            mark_archived(&mut conn, r.id).await.unwrap();
        }

        // The last five messages still go out without their timestamp record
        let second = records_to_archive(&mut conn, 10).await.unwrap();
        assert_eq!(second.len(), 5);
        assert_eq!(message_count(&second), 5);
        assert!(!ids(&second).contains(&ts));
        for r in &second {
            mark_archived(&mut conn, r.id).await.unwrap();
        }

        let third = records_to_archive(&mut conn, 10).await.unwrap();
        assert_eq!(ids(&third), vec![ts]);
    }

    #[tokio::test]
    async fn test_timestamp_with_archived_messages_precedes_pending_groups() {
        let db = DbService::in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();

        let ts1 = timestamp(&mut conn).await;
        let mr1 = message(&mut conn, Some(ts1)).await;
        mark_archived(&mut conn, mr1).await.unwrap();
        let ts2 = timestamp(&mut conn).await;
        let mr2 = message(&mut conn, Some(ts2)).await;

        let records = records_to_archive(&mut conn, 10).await.unwrap();
        assert_eq!(ids(&records), vec![ts1, mr2]);
    }

    #[tokio::test]
    async fn test_cap_spans_timestamp_groups() {
        let db = DbService::in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();

        let ts1 = timestamp(&mut conn).await;
        for _ in 0..3 {
            message(&mut conn, Some(ts1)).await;
        }
        let ts2 = timestamp(&mut conn).await;
        for _ in 0..3 {
            message(&mut conn, Some(ts2)).await;
        }

        let records = records_to_archive(&mut conn, 4).await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(message_count(&records), 4);
        assert!(!ids(&records).contains(&ts1));
        assert!(!ids(&records).contains(&ts2));
    }

    #[tokio::test]
    async fn test_timestamp_without_messages_is_selected() {
        let db = DbService::in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();

        let ts = timestamp(&mut conn).await;
        let records = records_to_archive(&mut conn, 10).await.unwrap();
        assert_eq!(ids(&records), vec![ts]);
    }

    #[tokio::test]
    async fn test_untimestamped_messages_are_skipped() {
        let db = DbService::in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();

        message(&mut conn, None).await;
        assert!(records_to_archive(&mut conn, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_cap_selects_nothing() {
        let db = DbService::in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();

        let ts = timestamp(&mut conn).await;
        message(&mut conn, Some(ts)).await;
        assert!(records_to_archive(&mut conn, 0).await.unwrap().is_empty());
    }
}
