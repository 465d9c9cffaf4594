//! 磁盘枚举与分区
//!
//! 枚举通过 WMI 完成；分区通过向 diskpart 的 stdin 写入脚本完成。

use anyhow::Result;

use crate::core::config::DeployConfig;
use crate::core::firmware::FirmwareType;
use crate::core::host::{execute_checked, require_admin, Host};
use crate::core::parameters::{DriveLetter, ResolvedParameters};
use crate::core::process::ToolCommand;
use crate::utils::path::resolve_tool;

/// 物理磁盘信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    pub index: u32,
    pub model: String,
    pub size_bytes: u64,
    /// 该磁盘上已分配盘符的分区，如 `C:`
    pub letters: Vec<String>,
}

impl DiskInfo {
    /// 以 GB 显示的容量
    pub fn size_gb(&self) -> f64 {
        self.size_bytes as f64 / 1024.0 / 1024.0 / 1024.0
    }
}

impl std::fmt::Display for DiskInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letters = if self.letters.is_empty() {
            "-".to_string()
        } else {
            self.letters.join(" ")
        };
        write!(
            f,
            "Disk {:<3} {:>9.1} GB  {:<40} {}",
            self.index,
            self.size_gb(),
            self.model,
            letters
        )
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
/// 转义 WQL 字符串字面量（DeviceID 形如 `\\.\PHYSICALDRIVE0`）
fn escape_wql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg_attr(not(windows), allow(dead_code))]
fn partitions_query(disk_device_id: &str) -> String {
    format!(
        "ASSOCIATORS OF {{Win32_DiskDrive.DeviceID='{}'}} WHERE AssocClass = Win32_DiskDriveToDiskPartition",
        escape_wql(disk_device_id)
    )
}

#[cfg_attr(not(windows), allow(dead_code))]
fn logical_disks_query(partition_device_id: &str) -> String {
    format!(
        "ASSOCIATORS OF {{Win32_DiskPartition.DeviceID='{}'}} WHERE AssocClass = Win32_LogicalDiskToPartition",
        escape_wql(partition_device_id)
    )
}

/// 通过 WMI 枚举物理磁盘及其盘符
#[cfg(windows)]
pub fn list_disks() -> Result<Vec<DiskInfo>> {
    use crate::core::wmi::{ComInitGuard, WmiConnection};

    let _com = ComInitGuard::new();
    let wmi = WmiConnection::connect_cimv2()?;

    let mut disks = Vec::new();
    for drive in wmi.query("SELECT Index, Model, Size, DeviceID FROM Win32_DiskDrive")? {
        let Some(index) = drive.get_u32("Index") else {
            continue;
        };
        let device_id = drive.get_string("DeviceID").unwrap_or_default();

        let mut letters = Vec::new();
        if !device_id.is_empty() {
            for partition in wmi.query(&partitions_query(&device_id))? {
                let Some(partition_id) = partition.get_string("DeviceID") else {
                    continue;
                };
                for logical in wmi.query(&logical_disks_query(&partition_id))? {
                    if let Some(letter) = logical.get_string("DeviceID") {
                        letters.push(letter);
                    }
                }
            }
        }
        letters.sort();

        disks.push(DiskInfo {
            index,
            model: drive
                .get_string("Model")
                .map(|m| m.trim().to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            size_bytes: drive.get_u64("Size").unwrap_or(0),
            letters,
        });
    }

    disks.sort_by_key(|d| d.index);
    log::info!("[WMI] 找到 {} 个磁盘", disks.len());
    Ok(disks)
}

#[cfg(not(windows))]
pub fn list_disks() -> Result<Vec<DiskInfo>> {
    Err(crate::core::error::DeployError::Unsupported.into())
}

/// 分区布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionLayout {
    /// GPT：ESP (FAT32) + MSR + Windows (NTFS)
    Gpt { efi_size_mb: u32, msr_size_mb: u32 },
    /// MBR：活动系统分区 (NTFS) + Windows (NTFS)
    Mbr { system_size_mb: u32 },
}

impl PartitionLayout {
    pub fn for_firmware(firmware: FirmwareType, config: &DeployConfig) -> Self {
        match firmware {
            FirmwareType::Uefi => PartitionLayout::Gpt {
                efi_size_mb: config.efi_partition_size_mb,
                msr_size_mb: config.msr_partition_size_mb,
            },
            FirmwareType::Bios => PartitionLayout::Mbr {
                system_size_mb: config.efi_partition_size_mb,
            },
        }
    }

    /// 生成 diskpart 脚本（逐行写入 stdin）
    pub fn diskpart_script(
        &self,
        disk_number: u32,
        efi_drive: DriveLetter,
        destination_drive: DriveLetter,
    ) -> Vec<String> {
        let mut lines = vec![format!("select disk {}", disk_number), "clean".to_string()];

        match *self {
            PartitionLayout::Gpt {
                efi_size_mb,
                msr_size_mb,
            } => {
                lines.push("convert gpt".to_string());
                lines.push(format!("create partition efi size={}", efi_size_mb));
                lines.push("format fs=fat32 quick".to_string());
                lines.push(format!("assign letter={}", efi_drive.letter()));
                lines.push(format!("create partition msr size={}", msr_size_mb));
            }
            PartitionLayout::Mbr { system_size_mb } => {
                lines.push("convert mbr".to_string());
                lines.push(format!("create partition primary size={}", system_size_mb));
                lines.push("format fs=ntfs quick".to_string());
                lines.push("active".to_string());
                lines.push(format!("assign letter={}", efi_drive.letter()));
            }
        }

        lines.push("create partition primary".to_string());
        lines.push("format fs=ntfs quick".to_string());
        lines.push(format!("assign letter={}", destination_drive.letter()));
        lines.push("exit".to_string());
        lines
    }
}

/// 获取 diskpart 可执行文件路径
fn get_diskpart_path() -> std::path::PathBuf {
    resolve_tool("diskpart.exe")
}

/// 清空并重新分区目标磁盘
pub fn format_disk<H: Host>(
    host: &H,
    params: &ResolvedParameters,
    config: &DeployConfig,
) -> Result<()> {
    require_admin(host, "format disks")?;

    let layout = PartitionLayout::for_firmware(params.firmware_type, config);
    let script =
        layout.diskpart_script(params.disk_number, params.efi_drive, params.destination_drive);

    log::info!(
        "[DISKPART] 格式化磁盘 {} ({:?})，引导分区 {}，系统分区 {}",
        params.disk_number,
        layout,
        params.efi_drive,
        params.destination_drive
    );

    let command = ToolCommand::new(get_diskpart_path()).stdin_lines(script);
    execute_checked(host, command, params.multithreaded)?;

    log::info!("[DISKPART] 磁盘 {} 分区完成", params.disk_number);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::error::DeployError;
    use crate::core::host::testing::RecordingHost;

    fn drive(s: &str) -> DriveLetter {
        DriveLetter::parse(s).unwrap()
    }

    fn resolved(firmware: FirmwareType) -> ResolvedParameters {
        ResolvedParameters {
            destination_drive: drive("Z:"),
            efi_drive: drive("Y:"),
            disk_number: 1,
            image_file_path: PathBuf::from(r"D:\sources\install.wim"),
            image_index: 1,
            firmware_type: firmware,
            additional_drivers: None,
            multithreaded: false,
        }
    }

    #[test]
    fn test_gpt_script() {
        let layout = PartitionLayout::for_firmware(FirmwareType::Uefi, &DeployConfig::default());
        let script = layout.diskpart_script(0, drive("Y:"), drive("Z:"));
        assert_eq!(
            script,
            vec![
                "select disk 0",
                "clean",
                "convert gpt",
                "create partition efi size=100",
                "format fs=fat32 quick",
                "assign letter=Y",
                "create partition msr size=16",
                "create partition primary",
                "format fs=ntfs quick",
                "assign letter=Z",
                "exit",
            ]
        );
    }

    #[test]
    fn test_mbr_script() {
        let config = DeployConfig {
            efi_partition_size_mb: 500,
            ..Default::default()
        };
        let layout = PartitionLayout::for_firmware(FirmwareType::Bios, &config);
        let script = layout.diskpart_script(2, drive("S:"), drive("W:"));
        assert_eq!(
            script,
            vec![
                "select disk 2",
                "clean",
                "convert mbr",
                "create partition primary size=500",
                "format fs=ntfs quick",
                "active",
                "assign letter=S",
                "create partition primary",
                "format fs=ntfs quick",
                "assign letter=W",
                "exit",
            ]
        );
    }

    #[test]
    fn test_format_disk_feeds_script_to_diskpart() {
        let host = RecordingHost::new();
        format_disk(&host, &resolved(FirmwareType::Uefi), &DeployConfig::default()).unwrap();

        let commands = host.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].tool_name(), "diskpart");
        assert!(commands[0].args.is_empty());
        assert_eq!(commands[0].stdin_lines[0], "select disk 1");
        assert_eq!(commands[0].stdin_lines.last().map(String::as_str), Some("exit"));
    }

    #[test]
    fn test_format_disk_failure() {
        let host = RecordingHost::new();
        host.respond("diskpart", Some(-2147212243), "");
        let err = format_disk(&host, &resolved(FirmwareType::Uefi), &DeployConfig::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::ToolFailed { tool, .. }) if tool == "diskpart"
        ));
    }

    #[test]
    fn test_format_disk_requires_admin() {
        let mut host = RecordingHost::new();
        host.admin = false;
        let err = format_disk(&host, &resolved(FirmwareType::Bios), &DeployConfig::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::NotElevated(_))
        ));
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_association_queries_escape_device_id() {
        assert_eq!(
            partitions_query(r"\\.\PHYSICALDRIVE0"),
            r"ASSOCIATORS OF {Win32_DiskDrive.DeviceID='\\\\.\\PHYSICALDRIVE0'} WHERE AssocClass = Win32_DiskDriveToDiskPartition"
        );
        assert_eq!(
            logical_disks_query("Disk #0, Partition #1"),
            "ASSOCIATORS OF {Win32_DiskPartition.DeviceID='Disk #0, Partition #1'} WHERE AssocClass = Win32_LogicalDiskToPartition"
        );
    }

    #[test]
    fn test_disk_display() {
        let disk = DiskInfo {
            index: 0,
            model: "Samsung SSD 970".to_string(),
            size_bytes: 500 * 1024 * 1024 * 1024,
            letters: vec!["C:".to_string(), "D:".to_string()],
        };
        let line = disk.to_string();
        assert!(line.starts_with("Disk 0"));
        assert!(line.contains("500.0 GB"));
        assert!(line.ends_with("C: D:"));
    }
}
