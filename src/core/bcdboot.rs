use std::path::PathBuf;

use anyhow::Result;

use crate::core::error::DeployError;
use crate::core::host::{execute_checked, require_admin, Host};
use crate::core::parameters::{DriveLetter, ResolvedParameters};
use crate::core::process::ToolCommand;
use crate::utils::path::resolve_tool;

/// 引导文件管理
pub struct BootManager {
    bcdboot_path: PathBuf,
}

impl BootManager {
    pub fn new() -> Self {
        Self {
            bcdboot_path: resolve_tool("bcdboot.exe"),
        }
    }

    /// `bcdboot <dest>\Windows /s <efi> /f <UEFI|BIOS>`
    pub fn bcdboot_command(&self, params: &ResolvedParameters) -> ToolCommand {
        ToolCommand::new(&self.bcdboot_path).args([
            format!("{}\\Windows", params.destination_drive),
            "/s".to_string(),
            params.efi_drive.to_string(),
            "/f".to_string(),
            params.firmware_type.as_bcdboot_arg().to_string(),
        ])
    }

    /// 检查引导分区是否已被其他系统的引导文件占用
    fn ensure_efi_drive_unused<H: Host>(host: &H, efi_drive: DriveLetter) -> Result<(), DeployError> {
        let efi_dir = host.volume_root(efi_drive).join("EFI");
        for occupied in ["Boot", "Microsoft"] {
            if efi_dir.join(occupied).exists() {
                log::error!("[BCDBOOT] 引导分区 {} 已存在 EFI\\{}", efi_drive, occupied);
                return Err(DeployError::EfiDriveInUse(efi_drive.to_string()));
            }
        }
        Ok(())
    }

    /// 为已释放的系统写入引导文件
    pub fn install_bootloader<H: Host>(&self, host: &H, params: &ResolvedParameters) -> Result<()> {
        require_admin(host, "install the bootloader")?;

        Self::ensure_efi_drive_unused(host, params.efi_drive)?;

        let windows_dir = host.volume_root(params.destination_drive).join("Windows");
        if !windows_dir.is_dir() {
            log::error!("[BCDBOOT] Windows 目录不存在: {}", windows_dir.display());
            return Err(DeployError::WindowsDirMissing(windows_dir).into());
        }

        log::info!(
            "[BCDBOOT] 写入引导: {}\\Windows -> {} ({})",
            params.destination_drive,
            params.efi_drive,
            params.firmware_type
        );

        execute_checked(host, self.bcdboot_command(params), params.multithreaded)?;

        log::info!("[BCDBOOT] 引导安装完成");
        Ok(())
    }
}

impl Default for BootManager {
    fn default() -> Self {
        Self::new()
    }
}
