//! 后台工作线程
//!
//! 在命名的后台线程中执行外部工具调用，等待其完成并把结果交还调用者。

use std::thread;

use anyhow::{Context, Result};

use crate::core::error::DeployError;

/// 在名为 `name` 的后台线程中运行 `task`，阻塞直到完成
///
/// 任务返回的错误原样传回；任务 panic 转换为 `DeployError::WorkerPanicked`。
pub fn run_on_worker<T, F>(name: &str, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    log::debug!("[WORKER] 启动工作线程: {}", name);

    let handle = thread::Builder::new()
        .name(format!("wcit-{}", name))
        .spawn(task)
        .with_context(|| format!("创建工作线程 {} 失败", name))?;

    match handle.join() {
        Ok(result) => {
            log::debug!("[WORKER] 工作线程结束: {}", name);
            result
        }
        Err(_) => {
            log::error!("[WORKER] 工作线程 panic: {}", name);
            Err(DeployError::WorkerPanicked(name.to_string()).into())
        }
    }
}
