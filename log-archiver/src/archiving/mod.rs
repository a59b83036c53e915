//! 归档系统 - 消息日志归档到 ZIP 文件 + 哈希链
//!
//! - **selector**: 选择待归档记录 (timestamp record 依赖规则, batch cap)
//! - **writer**: LogArchiveWriter (工作目录写入, 原子移动, 链头更新)
//! - **worker**: LogArchiver (触发通道驱动的状态机, 每批一个事务)
//! - **transfer**: 归档后执行外部传输命令
//! - **verify**: 归档链离线验证

pub mod base;
pub mod chain;
pub mod error;
pub mod scheduler;
pub mod selector;
pub mod transfer;
pub mod verify;
pub mod worker;
pub mod writer;

pub use base::{LogArchiveBase, SqliteArchiveBase};
pub use chain::{LinkingInfo, LINKING_INFO_ENTRY};
pub use error::{ArchiveError, ArchiveResult};
pub use scheduler::ArchiveScheduler;
pub use selector::{records_to_archive, MAX_RECORDS_IN_ARCHIVE};
pub use transfer::{TransferError, TransferInvoker, TransferStatus};
pub use verify::{verify_archive, verify_chain, ArchiveIssue, ChainBreak, ChainVerification};
pub use worker::{ArchiveTrigger, ArchiverSettings, ArchiverState, LogArchiver};
pub use writer::{FinalizedArchive, LogArchiveWriter};
