//! 安装流程管理
//!
//! 顺序固定：补全参数 -> 校验 -> 分区 -> 释放镜像 -> 注入驱动 -> 写入引导。
//! 任何一步失败都会中止后续步骤，不做重试和回滚。

use anyhow::Result;

use crate::core::bcdboot::BootManager;
use crate::core::config::DeployConfig;
use crate::core::deploy::{apply_image, install_additional_drivers};
use crate::core::disk::format_disk;
use crate::core::error::DeployError;
use crate::core::host::Host;
use crate::core::image::{get_image_info, locate_install_image};
use crate::core::parameters::{Parameters, ResolvedParameters};

pub struct InstallerManager<H: Host> {
    host: H,
    config: DeployConfig,
}

impl<H: Host> InstallerManager<H> {
    pub fn new(host: H, config: DeployConfig) -> Self {
        Self { host, config }
    }

    /// 补全可推导的参数：镜像路径、镜像索引、固件类型
    pub fn configure(&self, mut params: Parameters) -> Result<Parameters> {
        if params.image_file_path.is_none() {
            if let Some(source) = params.source_drive {
                let image = locate_install_image(&self.host.volume_root(source))?;
                params.image_file_path = Some(image);
            }
        }

        if params.firmware_type.is_none() {
            let firmware = self.host.firmware_type();
            log::info!("检测到固件类型: {}", firmware);
            params.firmware_type = Some(firmware);
        }

        if let Some(image) = params.image_file_path.clone() {
            match params.image_index {
                None => {
                    let images = get_image_info(&self.host, &image)?;
                    match images.as_slice() {
                        [only] => {
                            log::info!("镜像只包含一个版本，自动选择索引 {}", only.index);
                            params.image_index = Some(only.index);
                        }
                        _ => return Err(DeployError::AmbiguousImage(image).into()),
                    }
                }
                Some(0) => {}
                Some(index) => match get_image_info(&self.host, &image) {
                    Ok(images) if !images.iter().any(|i| i.index == index) => {
                        let available = images
                            .iter()
                            .map(|i| i.index.to_string())
                            .collect::<Vec<_>>()
                            .join(", ");
                        return Err(DeployError::UnknownImageIndex {
                            index,
                            image,
                            available,
                        }
                        .into());
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("无法校验镜像索引 {}: {:#}", index, e),
                },
            }
        }

        Ok(params)
    }

    /// 校验参数并冻结为 `ResolvedParameters`
    pub fn prepare(&self, params: &Parameters) -> Result<ResolvedParameters> {
        let resolved = ResolvedParameters::try_from(params)?;
        log::info!("部署参数:\n{}", params.summary());
        Ok(resolved)
    }

    /// 分区并格式化目标磁盘
    pub fn format(&self, resolved: &ResolvedParameters) -> Result<()> {
        let _span = tracing::info_span!("format", disk = resolved.disk_number).entered();
        println!("==> Formatting disk {}", resolved.disk_number);
        format_disk(&self.host, resolved, &self.config)
    }

    /// 释放镜像、注入驱动、写入引导
    pub fn install_windows(&self, resolved: &ResolvedParameters) -> Result<()> {
        {
            let _span = tracing::info_span!("apply_image", index = resolved.image_index).entered();
            println!(
                "==> Deploying Windows to drive {} (index {})",
                resolved.destination_drive, resolved.image_index
            );
            apply_image(&self.host, resolved, &self.config)?;
        }

        if let Some(drivers) = &resolved.additional_drivers {
            let _span = tracing::info_span!("drivers").entered();
            println!("==> Installing additional drivers from {}", drivers.display());
            install_additional_drivers(&self.host, resolved, &self.config)?;
        }

        {
            let _span = tracing::info_span!("bootloader").entered();
            println!(
                "==> Installing bootloader to drive {} ({})",
                resolved.efi_drive, resolved.firmware_type
            );
            BootManager::new().install_bootloader(&self.host, resolved)?;
        }

        Ok(())
    }

    /// 完整流程；`confirm` 在破坏性操作前调用，返回 false 时不做任何修改
    ///
    /// 返回是否实际执行了部署。
    pub fn run<F>(&self, params: Parameters, confirm: F) -> Result<bool>
    where
        F: FnOnce(&Parameters) -> Result<bool>,
    {
        let params = self.configure(params)?;
        let resolved = self.prepare(&params)?;

        if !confirm(&params)? {
            log::info!("用户取消部署");
            return Ok(false);
        }

        self.format(&resolved)?;
        self.install_windows(&resolved)?;

        log::info!("部署完成");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::firmware::FirmwareType;
    use crate::core::host::testing::{Call, RecordingHost};
    use crate::core::parameters::DriveLetter;

    const TWO_EDITIONS: &str = "Index : 1\nName : Windows 11 Home\nSize : 1 bytes\n\n\
                                Index : 6\nName : Windows 11 Pro\nSize : 2 bytes\n";
    const ONE_EDITION: &str = "Index : 4\nName : Windows 11 Education\nSize : 1 bytes\n";

    fn drive(s: &str) -> DriveLetter {
        DriveLetter::parse(s).unwrap()
    }

    struct Fixture {
        _source: tempfile::TempDir,
        dest: tempfile::TempDir,
        _efi: tempfile::TempDir,
        host: RecordingHost,
        image: PathBuf,
    }

    /// 源盘 D: 带 sources\install.wim，目标盘 Z:，引导盘 Y:
    fn fixture() -> Fixture {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let efi = tempfile::tempdir().unwrap();
        let sources = source.path().join("sources");
        std::fs::create_dir(&sources).unwrap();
        let image = sources.join("install.wim");
        std::fs::write(&image, b"").unwrap();

        let host = RecordingHost::new();
        host.mount("D:", source.path());
        host.mount("Z:", dest.path());
        host.mount("Y:", efi.path());
        host.respond("dism", Some(0), TWO_EDITIONS);

        Fixture {
            _source: source,
            dest,
            _efi: efi,
            host,
            image,
        }
    }

    fn params() -> Parameters {
        Parameters {
            destination_drive: Some(drive("Z:")),
            efi_drive: Some(drive("Y:")),
            disk_number: Some(0),
            source_drive: Some(drive("D:")),
            image_index: Some(6),
            ..Default::default()
        }
    }

    #[test]
    fn test_configure_fills_image_and_firmware() {
        let f = fixture();
        let manager = InstallerManager::new(f.host.clone(), DeployConfig::default());

        let params = manager.configure(params()).unwrap();
        assert_eq!(params.image_file_path.as_deref(), Some(f.image.as_path()));
        assert_eq!(params.firmware_type, Some(FirmwareType::Uefi));
        assert_eq!(params.image_index, Some(6));
    }

    #[test]
    fn test_configure_keeps_explicit_firmware() {
        let f = fixture();
        let manager = InstallerManager::new(f.host.clone(), DeployConfig::default());
        let mut input = params();
        input.firmware_type = Some(FirmwareType::Bios);

        let params = manager.configure(input).unwrap();
        assert_eq!(params.firmware_type, Some(FirmwareType::Bios));
    }

    #[test]
    fn test_configure_picks_single_edition() {
        let f = fixture();
        f.host.respond("dism", Some(0), ONE_EDITION);
        let manager = InstallerManager::new(f.host.clone(), DeployConfig::default());
        let mut input = params();
        input.image_index = None;

        let params = manager.configure(input).unwrap();
        assert_eq!(params.image_index, Some(4));
    }

    #[test]
    fn test_configure_rejects_ambiguous_image() {
        let f = fixture();
        let manager = InstallerManager::new(f.host.clone(), DeployConfig::default());
        let mut input = params();
        input.image_index = None;

        let err = manager.configure(input).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::AmbiguousImage(_))
        ));
    }

    #[test]
    fn test_configure_rejects_unknown_index() {
        let f = fixture();
        let manager = InstallerManager::new(f.host.clone(), DeployConfig::default());
        let mut input = params();
        input.image_index = Some(3);

        let err = manager.configure(input).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::UnknownImageIndex { index: 3, available, .. }) if available == "1, 6"
        ));
    }

    #[test]
    fn test_prepare_reports_missing_disk() {
        let f = fixture();
        let manager = InstallerManager::new(f.host.clone(), DeployConfig::default());
        let mut input = manager.configure(params()).unwrap();
        input.disk_number = None;

        let err = manager.prepare(&input).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::MissingParameter("disk number"))
        ));
    }

    #[test]
    fn test_run_full_sequence() {
        let f = fixture();
        let drivers = tempfile::tempdir().unwrap();
        f.host
            .create_dir_on("/Apply-Image", &f.dest.path().join("Windows"));
        let manager = InstallerManager::new(f.host.clone(), DeployConfig::default());
        let mut input = params();
        input.additional_drivers = Some(drivers.path().to_path_buf());

        let mut confirmed = None;
        let deployed = manager
            .run(input, |p| {
                confirmed = p.image_file_path.clone();
                Ok(true)
            })
            .unwrap();
        assert!(deployed);
        assert_eq!(confirmed.as_deref(), Some(f.image.as_path()));

        let calls = f.host.calls();
        assert_eq!(calls.len(), 5);
        assert!(matches!(&calls[3], Call::AddDriversApi { drivers_dir, .. } if drivers_dir == drivers.path()));

        let commands = f.host.commands();
        let tools: Vec<String> = commands.iter().map(|c| c.tool_name()).collect();
        assert_eq!(tools, vec!["dism", "diskpart", "dism", "bcdboot"]);
        assert!(commands[0].capture);
        assert_eq!(commands[1].stdin_lines[0], "select disk 0");
        assert!(commands[2].args.contains(&"/Apply-Image".to_string()));
        assert!(commands[2].args.contains(&"/Index:6".to_string()));
        assert_eq!(commands[3].args, vec![r"Z:\Windows", "/s", "Y:", "/f", "UEFI"]);
    }

    #[test]
    fn test_apply_failure_skips_bootloader() {
        let f = fixture();
        let manager = InstallerManager::new(f.host.clone(), DeployConfig::default());
        let params = manager.configure(params()).unwrap();
        let resolved = manager.prepare(&params).unwrap();

        f.host.respond("dism", Some(1392), "");
        let err = manager.install_windows(&resolved).unwrap_err();
        assert!(err.to_string().contains("dism failed with exit code 1392"));
        assert!(!f.host.tool_names().contains(&"bcdboot".to_string()));
    }

    #[test]
    fn test_run_declined_changes_nothing() {
        let f = fixture();
        let manager = InstallerManager::new(f.host.clone(), DeployConfig::default());

        let deployed = manager.run(params(), |_| Ok(false)).unwrap();
        assert!(!deployed);
        // 只有查询镜像信息的 dism 调用
        assert_eq!(f.host.tool_names(), vec!["dism"]);
    }

    #[test]
    fn test_format_failure_aborts_sequence() {
        let f = fixture();
        f.host.respond("diskpart", Some(1), "");
        let manager = InstallerManager::new(f.host.clone(), DeployConfig::default());

        let err = manager.run(params(), |_| Ok(true)).unwrap_err();
        assert!(err.to_string().contains("diskpart failed with exit code 1"));
        assert_eq!(f.host.tool_names(), vec!["dism", "diskpart"]);
    }

    #[test]
    fn test_threaded_run_uses_worker() {
        let f = fixture();
        f.host.respond("diskpart", Some(1), "");
        let manager = InstallerManager::new(f.host.clone(), DeployConfig::default());
        let mut input = params();
        input.multithreaded = true;

        manager.run(input, |_| Ok(true)).unwrap_err();
        let threads = f.host.threads.lock().clone();
        assert_eq!(threads.last().cloned().flatten().as_deref(), Some("wcit-diskpart"));
    }
}
