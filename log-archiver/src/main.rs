use anyhow::Context;
use log_archiver::{
    ArchiveScheduler, BackgroundTasks, Config, DbService, LogArchiver, TaskKind,
    init_logger_with_file,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 环境 (.env) + 配置 + 日志
    dotenv::dotenv().ok();
    let config = Config::from_env();
    init_logger_with_file(&config.log_level, config.log_dir.as_deref());

    tracing::info!(environment = %config.environment, "Message log archiver starting...");

    // 2. 数据库
    let db = DbService::new(&config.db_path).await.with_context(|| {
        format!(
            "Failed to open message log database {}",
            config.db_path.display()
        )
    })?;

    // 3. 后台任务: archiver + scheduler
    let mut tasks = BackgroundTasks::new();
    let archiver = LogArchiver::new(db.pool.clone(), config.archiver_settings());

    let shutdown = tasks.shutdown_token();
    let scheduler = ArchiveScheduler::new(
        archiver.trigger(),
        config.archive_interval,
        shutdown.clone(),
    );

    tasks.spawn("log_archiver", TaskKind::Worker, archiver.run(shutdown));
    tasks.spawn("archive_scheduler", TaskKind::Periodic, scheduler.run());
    tasks.log_summary();

    // 4. 等待 Ctrl-C
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    if tasks.check_health() > 0 {
        tracing::warn!("Some background tasks had already stopped");
    }
    tasks.shutdown().await;
    db.pool.close().await;

    Ok(())
}
