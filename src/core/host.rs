//! 宿主系统抽象
//!
//! 安装流程对操作系统的全部访问都经过 `Host`：权限、固件、磁盘枚举、
//! 卷路径、外部工具、DISM API。`WindowsHost` 是真实实现。

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::disk::DiskInfo;
use crate::core::dismapi::DismLogLevel;
use crate::core::error::DeployError;
use crate::core::firmware::FirmwareType;
use crate::core::parameters::DriveLetter;
use crate::core::process::{ToolCommand, ToolOutput};
use crate::core::worker::run_on_worker;

pub trait Host: Clone + Send + Sync + 'static {
    fn is_admin(&self) -> bool;

    fn firmware_type(&self) -> FirmwareType;

    fn list_disks(&self) -> Result<Vec<DiskInfo>>;

    /// 盘符对应的文件系统根目录
    fn volume_root(&self, drive: DriveLetter) -> PathBuf;

    fn run(&self, command: &ToolCommand) -> Result<ToolOutput>;

    /// 通过 DISM API 向离线系统注入驱动，返回注入数量
    fn add_drivers_api(
        &self,
        image_root: &Path,
        drivers_dir: &Path,
        force_unsigned: bool,
        log_level: DismLogLevel,
    ) -> Result<usize>;
}

/// 真实的 Windows 宿主
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsHost;

impl Host for WindowsHost {
    fn is_admin(&self) -> bool {
        crate::utils::privilege::is_admin()
    }

    fn firmware_type(&self) -> FirmwareType {
        crate::core::firmware::detect_firmware_type()
    }

    fn list_disks(&self) -> Result<Vec<DiskInfo>> {
        crate::core::disk::list_disks()
    }

    fn volume_root(&self, drive: DriveLetter) -> PathBuf {
        drive.root()
    }

    fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        crate::core::process::run_tool(command)
    }

    fn add_drivers_api(
        &self,
        image_root: &Path,
        drivers_dir: &Path,
        force_unsigned: bool,
        log_level: DismLogLevel,
    ) -> Result<usize> {
        crate::core::dismapi::add_drivers_offline(image_root, drivers_dir, force_unsigned, log_level)
    }
}

/// 要求管理员权限，`action` 出现在错误信息中（如 "format disks"）
pub fn require_admin<H: Host>(host: &H, action: &str) -> Result<(), DeployError> {
    if host.is_admin() {
        Ok(())
    } else {
        log::error!("缺少管理员权限，无法执行: {}", action);
        Err(DeployError::NotElevated(action.to_string()))
    }
}

/// 执行外部工具；`threaded` 时放到后台工作线程并等待其结束
pub fn execute<H: Host>(host: &H, command: ToolCommand, threaded: bool) -> Result<ToolOutput> {
    if !threaded {
        return host.run(&command);
    }

    let host = host.clone();
    let name = command.tool_name();
    run_on_worker(&name, move || host.run(&command))
}

/// 执行外部工具并要求退出码为 0
pub fn execute_checked<H: Host>(
    host: &H,
    command: ToolCommand,
    threaded: bool,
) -> Result<ToolOutput> {
    let tool = command.tool_name();
    let output = execute(host, command, threaded)?;
    DeployError::check_exit(&tool, output.exit_code)?;
    Ok(output)
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingHost;
    use super::*;

    #[test]
    fn test_require_admin() {
        let mut host = RecordingHost::new();
        assert!(require_admin(&host, "format disks").is_ok());

        host.admin = false;
        let err = require_admin(&host, "format disks").unwrap_err();
        assert_eq!(
            err.to_string(),
            "administrator privileges are required to format disks"
        );
    }

    #[test]
    fn test_execute_on_worker_thread() {
        let host = RecordingHost::new();
        execute(&host, ToolCommand::new("diskpart.exe"), true).unwrap();
        execute(&host, ToolCommand::new("diskpart.exe"), false).unwrap();

        let threads = host.threads.lock().clone();
        assert_eq!(threads[0].as_deref(), Some("wcit-diskpart"));
        assert_ne!(threads[1].as_deref(), Some("wcit-diskpart"));
    }

    #[test]
    fn test_execute_checked_maps_exit_code() {
        let host = RecordingHost::new();
        host.respond("bcdboot", Some(5), "");
        let err = execute_checked(&host, ToolCommand::new("bcdboot.exe"), false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::ToolFailed { tool, code: 5 }) if tool == "bcdboot"
        ));
    }
}
