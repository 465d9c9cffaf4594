//! 镜像释放与驱动注入

use anyhow::Result;

use crate::core::config::DeployConfig;
use crate::core::dism_exe::DismExe;
use crate::core::error::DeployError;
use crate::core::host::{execute_checked, require_admin, Host};
use crate::core::parameters::ResolvedParameters;

/// 将镜像中选定的版本释放到目标分区
///
/// 目标分区已存在 Windows 目录时拒绝覆盖。
pub fn apply_image<H: Host>(
    host: &H,
    params: &ResolvedParameters,
    config: &DeployConfig,
) -> Result<()> {
    require_admin(host, "apply images")?;

    let windows_dir = host.volume_root(params.destination_drive).join("Windows");
    if windows_dir.exists() {
        log::warn!("[DISM.EXE] 目标已存在 Windows 目录: {}", windows_dir.display());
        return Err(DeployError::AlreadyDeployed(windows_dir).into());
    }

    log::info!(
        "[DISM.EXE] 释放镜像: {} (索引 {}) -> {}",
        params.image_file().display(),
        params.image_index,
        params.destination_drive
    );

    let command = DismExe::new().apply_image(
        params.image_file(),
        params.image_index,
        params.destination_drive,
        config.verify_image,
    );
    execute_checked(host, command, params.multithreaded)?;

    log::info!("[DISM.EXE] 镜像释放完成");
    Ok(())
}

/// 向离线系统注入附加驱动
///
/// 先走 DISM API；API 不可用或失败时回退到 `dism.exe /Add-Driver /Recurse`。
pub fn install_additional_drivers<H: Host>(
    host: &H,
    params: &ResolvedParameters,
    config: &DeployConfig,
) -> Result<()> {
    let Some(drivers_dir) = params.additional_drivers.as_deref() else {
        log::info!("未指定附加驱动，跳过");
        return Ok(());
    };

    require_admin(host, "install drivers")?;

    if !drivers_dir.is_dir() {
        return Err(DeployError::DriversNotFound(drivers_dir.to_path_buf()).into());
    }

    let image_root = host.volume_root(params.destination_drive);
    match host.add_drivers_api(
        &image_root,
        drivers_dir,
        config.force_unsigned_drivers,
        config.dism_log_level,
    ) {
        Ok(count) => {
            log::info!("[DISMAPI] 已注入 {} 个驱动", count);
            return Ok(());
        }
        Err(e) => log::warn!("[DISMAPI] 驱动注入失败，回退到 dism.exe: {:#}", e),
    }

    let command = DismExe::new().add_driver(
        params.destination_drive,
        drivers_dir,
        config.force_unsigned_drivers,
    );
    execute_checked(host, command, params.multithreaded)?;

    log::info!("[DISM.EXE] 驱动导入完成: {}", drivers_dir.display());
    Ok(())
}
