//! Log Record Model
//!
//! 消息日志记录：消息记录 (MessageRecord) 与时间戳记录 (TimestampRecord)
//! 共用一张 `logrecord` 表，通过 `discriminator` 列区分。

use serde::{Deserialize, Serialize};

/// Discriminator value stored for message records
pub const MESSAGE_DISCRIMINATOR: &str = "m";
/// Discriminator value stored for timestamp records
pub const TIMESTAMP_DISCRIMINATOR: &str = "t";

/// Record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogRecordKind {
    Message,
    Timestamp,
}

impl LogRecordKind {
    pub fn discriminator(self) -> &'static str {
        match self {
            LogRecordKind::Message => MESSAGE_DISCRIMINATOR,
            LogRecordKind::Timestamp => TIMESTAMP_DISCRIMINATOR,
        }
    }

    pub fn from_discriminator(value: &str) -> Option<Self> {
        match value {
            MESSAGE_DISCRIMINATOR => Some(LogRecordKind::Message),
            TIMESTAMP_DISCRIMINATOR => Some(LogRecordKind::Timestamp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogRecordKind::Message => "message",
            LogRecordKind::Timestamp => "timestamp",
        }
    }
}

impl std::fmt::Display for LogRecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logged message (signed request or response)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub query_id: String,
    /// Logged message payload
    pub message: String,
    pub signature: String,
    pub signature_hash: Option<String>,
    /// Member (client or service provider) the message was logged for
    pub member_id: String,
    pub response: bool,
    /// Timestamp record covering this message (`None` until timestamped)
    pub timestamp_record_id: Option<i64>,
    /// Hash chain linking the signature hash into the timestamp's hash chain result
    pub timestamp_hash_chain: Option<String>,
}

/// Externally obtained trust timestamp covering a group of messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampRecord {
    /// Base64 encoded timestamp token
    pub timestamp: String,
    pub hash_chain_result: Option<String>,
}

/// Variant-specific record content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogRecordBody {
    Message(MessageRecord),
    Timestamp(TimestampRecord),
}

/// Log record entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    /// Creation time (Unix millis)
    pub time: i64,
    pub archived: bool,
    #[serde(flatten)]
    pub body: LogRecordBody,
}

impl LogRecord {
    pub fn kind(&self) -> LogRecordKind {
        match self.body {
            LogRecordBody::Message(_) => LogRecordKind::Message,
            LogRecordBody::Timestamp(_) => LogRecordKind::Timestamp,
        }
    }

    /// Timestamp record this record belongs to.
    ///
    /// A timestamp record is its own parent.
    pub fn timestamp_record_id(&self) -> Option<i64> {
        match &self.body {
            LogRecordBody::Message(m) => m.timestamp_record_id,
            LogRecordBody::Timestamp(_) => Some(self.id),
        }
    }
}

/// Flat `logrecord` table row
#[derive(Debug, Clone)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct LogRecordRow {
    pub id: i64,
    pub discriminator: String,
    pub time: i64,
    pub archived: bool,
    pub query_id: Option<String>,
    pub message: Option<String>,
    pub signature: Option<String>,
    pub signature_hash: Option<String>,
    pub member_id: Option<String>,
    pub response: Option<bool>,
    pub timestamp_record: Option<i64>,
    pub timestamp_hash_chain: Option<String>,
    pub timestamp: Option<String>,
    pub hash_chain_result: Option<String>,
}

/// Row could not be mapped to a record variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidLogRecord {
    #[error("log record #{id} has unknown discriminator '{discriminator}'")]
    UnknownDiscriminator { id: i64, discriminator: String },
    #[error("log record #{id} is missing column '{column}'")]
    MissingColumn { id: i64, column: &'static str },
}

impl TryFrom<LogRecordRow> for LogRecord {
    type Error = InvalidLogRecord;

    fn try_from(row: LogRecordRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let required = |value: Option<String>, column: &'static str| {
            value.ok_or(InvalidLogRecord::MissingColumn { id, column })
        };

        let body = match LogRecordKind::from_discriminator(&row.discriminator) {
            Some(LogRecordKind::Message) => LogRecordBody::Message(MessageRecord {
                query_id: required(row.query_id, "query_id")?,
                message: required(row.message, "message")?,
                signature: required(row.signature, "signature")?,
                signature_hash: row.signature_hash,
                member_id: required(row.member_id, "member_id")?,
                response: row.response.unwrap_or(false),
                timestamp_record_id: row.timestamp_record,
                timestamp_hash_chain: row.timestamp_hash_chain,
            }),
            Some(LogRecordKind::Timestamp) => LogRecordBody::Timestamp(TimestampRecord {
                timestamp: required(row.timestamp, "timestamp")?,
                hash_chain_result: row.hash_chain_result,
            }),
            None => {
                return Err(InvalidLogRecord::UnknownDiscriminator {
                    id,
                    discriminator: row.discriminator,
                });
            }
        };

        Ok(LogRecord {
            id,
            time: row.time,
            archived: row.archived,
            body,
        })
    }
}
