//! 日志管理模块
//!
//! 日志文件存储在 `{程序目录}/log`，按日期滚动。
//! 控制台只输出面向用户的提示，详细过程（命令行、退出码、WMI 查询）写入日志文件。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use super::path::get_exe_dir;

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "wcit.log";

/// 全局日志启用状态
static LOG_ENABLED: AtomicBool = AtomicBool::new(false);

/// 全局日志守卫（保持文件写入器存活）
static LOG_GUARD: OnceLock<RwLock<Option<WorkerGuard>>> = OnceLock::new();

/// 日志管理器
pub struct LogManager;

impl LogManager {
    /// 获取日志目录路径
    pub fn get_log_dir() -> PathBuf {
        get_exe_dir().join("log")
    }

    /// 初始化日志系统
    ///
    /// `enabled` 为 false 时安装一个丢弃所有输出的订阅器
    pub fn init(enabled: bool) -> anyhow::Result<()> {
        Self::init_in(&Self::get_log_dir(), enabled)
    }

    fn init_in(log_dir: &Path, enabled: bool) -> anyhow::Result<()> {
        LOG_ENABLED.store(enabled, Ordering::SeqCst);

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        if enabled {
            std::fs::create_dir_all(log_dir)?;

            let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(env_filter);

            // try_init 同时安装 log -> tracing 桥接
            tracing_subscriber::registry().with(file_layer).try_init()?;

            let lock = LOG_GUARD.get_or_init(|| RwLock::new(None));
            *lock.write() = Some(guard);

            log::info!("日志系统初始化完成，日志目录: {}", log_dir.display());
        } else {
            let noop_layer = fmt::layer()
                .with_writer(std::io::sink)
                .with_filter(EnvFilter::new("off"));

            tracing_subscriber::registry().with(noop_layer).try_init()?;
        }

        Ok(())
    }

    /// 检查日志是否启用
    pub fn is_enabled() -> bool {
        LOG_ENABLED.load(Ordering::SeqCst)
    }

    /// 程序退出前刷新日志（丢弃守卫会刷新 non_blocking 缓冲）
    pub fn shutdown() {
        if let Some(lock) = LOG_GUARD.get() {
            lock.write().take();
        }
    }

    /// 清理旧日志文件
    ///
    /// 删除 `days` 天之前修改过的日志文件
    pub fn cleanup_old_logs(days: u32) -> anyhow::Result<usize> {
        Self::cleanup_old_logs_in(&Self::get_log_dir(), days)
    }

    fn cleanup_old_logs_in(log_dir: &Path, days: u32) -> anyhow::Result<usize> {
        if !log_dir.exists() {
            return Ok(0);
        }

        let cutoff = chrono::Local::now() - chrono::Duration::days(days as i64);
        let mut removed = 0;

        for entry in std::fs::read_dir(log_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let is_log = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(LOG_FILE_PREFIX))
                .unwrap_or(false);
            if !is_log {
                continue;
            }

            let Ok(modified) = path.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let modified: chrono::DateTime<chrono::Local> = modified.into();
            if modified < cutoff {
                match std::fs::remove_file(&path) {
                    Ok(_) => {
                        log::info!("已删除旧日志文件: {}", path.display());
                        removed += 1;
                    }
                    Err(e) => log::warn!("删除旧日志文件失败: {} - {}", path.display(), e),
                }
            }
        }

        Ok(removed)
    }

    /// 获取日志目录大小（字节）
    pub fn get_log_dir_size() -> u64 {
        Self::dir_size(&Self::get_log_dir())
    }

    fn dir_size(dir: &Path) -> u64 {
        if !dir.exists() {
            return 0;
        }

        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }
}
