use crate::archiving::{ArchiverSettings, MAX_RECORDS_IN_ARCHIVE, TransferInvoker};
use std::path::PathBuf;
use std::time::Duration;

/// 归档服务配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | MESSAGELOG_DB_PATH | /var/lib/messagelog/messagelog.db | SQLite 数据库 |
/// | ARCHIVE_PATH | /var/lib/messagelog/archive | 归档输出目录 |
/// | ARCHIVE_WORKING_PATH | /var/tmp/messagelog | 工作目录 |
/// | ARCHIVE_TRANSFER_COMMAND | (空) | 归档传输命令 |
/// | ARCHIVE_TRANSFER_TIMEOUT_SECS | 0 | 传输超时(秒), 0 = 不限 |
/// | ARCHIVE_INTERVAL_SECS | 1800 | 归档间隔(秒) |
/// | ARCHIVE_MAX_RECORDS | 10 | 每个归档的消息记录上限 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_DIR | (未设置) | 日志文件目录 |
/// | ENVIRONMENT | development | 运行环境 |
///
/// # 示例
///
/// ```ignore
/// ARCHIVE_PATH=/data/archive ARCHIVE_INTERVAL_SECS=60 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub archive_path: PathBuf,
    pub working_path: PathBuf,
    /// Shell command run after each archive, empty = none
    pub transfer_command: String,
    pub transfer_timeout: Option<Duration>,
    pub archive_interval: Duration,
    pub max_records: usize,
    pub log_level: String,
    /// 日志文件目录，未设置时只输出到终端
    pub log_dir: Option<PathBuf>,
    /// 运行环境: development | staging | production
    pub environment: String,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置或无法解析，使用默认值
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let transfer_timeout = match parse("ARCHIVE_TRANSFER_TIMEOUT_SECS", 0) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            db_path: lookup("MESSAGELOG_DB_PATH")
                .unwrap_or_else(|| "/var/lib/messagelog/messagelog.db".into())
                .into(),
            archive_path: lookup("ARCHIVE_PATH")
                .unwrap_or_else(|| "/var/lib/messagelog/archive".into())
                .into(),
            working_path: lookup("ARCHIVE_WORKING_PATH")
                .unwrap_or_else(|| "/var/tmp/messagelog".into())
                .into(),
            transfer_command: lookup("ARCHIVE_TRANSFER_COMMAND").unwrap_or_default(),
            transfer_timeout,
            archive_interval: Duration::from_secs(parse("ARCHIVE_INTERVAL_SECS", 1800).max(1)),
            max_records: lookup("ARCHIVE_MAX_RECORDS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(MAX_RECORDS_IN_ARCHIVE)
                .max(1),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            log_dir: lookup("LOG_DIR").filter(|d| !d.is_empty()).map(PathBuf::from),
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".into()),
        }
    }

    pub fn archiver_settings(&self) -> ArchiverSettings {
        ArchiverSettings::new(&self.archive_path, &self.working_path)
            .with_max_records(self.max_records)
            .with_transfer(TransferInvoker::new(
                self.transfer_command.clone(),
                self.transfer_timeout,
            ))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
