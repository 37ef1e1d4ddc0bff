// 日志管理模块
// 提供异步非阻塞的日志持久化功能

use std::path::Path;
use std::fs;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use crate::config::LogLevel;

/// 日志保留天数
const LOG_RETENTION_DAYS: u64 = 7;

const LOG_FILE_PREFIX: &str = "lacss-bridge.log";

/// 初始化日志系统
///
/// 返回 WorkerGuard，调用方必须保持存活，否则异步日志线程会提前退出。
/// 宿主已安装全局 subscriber 时不覆盖，仅返回 guard。
pub fn init_logging(log_dir: &Path, log_level: &LogLevel) -> WorkerGuard {
    // 确保日志目录存在
    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("创建日志目录失败: {}", e);
    }

    // 清理旧日志文件
    cleanup_old_logs(log_dir, Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60));

    // 按天轮转日志文件
    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        log_dir,
        LOG_FILE_PREFIX,
    );

    // 异步非阻塞写入，推理线程不会被磁盘 IO 拖慢
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));

    // 文件日志层 - 详细格式
    let file_layer = fmt::layer()
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true);

    // 控制台日志层 - 仅在 debug 模式下启用
    #[cfg(debug_assertions)]
    {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(false)
            .with_target(true);

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(console_layer)
            .try_init();
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .try_init();
    }

    guard
}

/// 清理超过保留期限的旧日志文件
fn cleanup_old_logs(log_dir: &Path, retention: Duration) {
    let now = std::time::SystemTime::now();

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };

        // 只清理本模块产生的日志
        if !file_name.starts_with(LOG_FILE_PREFIX) {
            continue;
        }

        let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => continue,
        };

        if let Ok(age) = now.duration_since(modified) {
            if age >= retention {
                if let Err(e) = fs::remove_file(&path) {
                    eprintln!("删除旧日志文件失败 {:?}: {}", path, e);
                }
            }
        }
    }
}
