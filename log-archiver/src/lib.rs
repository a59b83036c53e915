//! Message Log Archiver - 消息日志归档服务
//!
//! Moves finalized message log records out of the live SQLite store into
//! hash-chained ZIP archive files, then hands each archive to an optional
//! transfer command.
//!
//! # 模块结构
//!
//! ```text
//! log-archiver/src/
//! ├── core/          # 配置、后台任务
//! ├── db/            # SQLite 连接、迁移、repository
//! ├── archiving/     # 选择、写入、哈希链、工作者、传输、验证
//! └── utils/         # 日志
//! ```

pub mod archiving;
pub mod core;
pub mod db;
pub mod utils;

pub use archiving::{
    ArchiveError, ArchiveResult, ArchiveScheduler, ArchiveTrigger, ArchiverSettings,
    ArchiverState, LogArchiver, TransferInvoker,
};
pub use core::{BackgroundTasks, Config, TaskKind};
pub use db::DbService;
pub use utils::logger::{init_logger, init_logger_with_file};
