//! 部署参数
//!
//! 前端（命令行）收集参数，`InstallerManager::configure` 补全可推导的部分，
//! `InstallerManager::prepare` 校验后冻结为 `ResolvedParameters`。

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::error::DeployError;
use crate::core::firmware::FirmwareType;

/// 盘符校验错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriveLetterError {
    #[error("no drive letter was specified")]
    Empty,

    #[error("invalid drive {0}, it must have a colon at the end not at the beginning. For example: 'H:'")]
    LeadingColon(String),

    #[error("invalid drive {0}, it must have a colon. For example: 'H:'")]
    MissingColon(String),

    #[error("invalid drive {0}, it must be a single letter followed by a colon. For example: 'H:'")]
    InvalidLength(String),

    #[error("invalid drive {0}, '{1}' is not a drive letter")]
    NotALetter(String, char),
}

/// 已校验的盘符（如 `Z:`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriveLetter(char);

impl DriveLetter {
    pub fn parse(input: &str) -> Result<Self, DriveLetterError> {
        let value = input.trim().to_ascii_uppercase();

        if value.is_empty() {
            return Err(DriveLetterError::Empty);
        }
        if value.starts_with(':') {
            return Err(DriveLetterError::LeadingColon(value));
        }
        if !value.ends_with(':') {
            return Err(DriveLetterError::MissingColon(value));
        }
        if value.chars().count() != 2 {
            return Err(DriveLetterError::InvalidLength(value));
        }

        let letter = value.chars().next().ok_or(DriveLetterError::Empty)?;
        if !letter.is_ascii_alphabetic() {
            return Err(DriveLetterError::NotALetter(value, letter));
        }

        Ok(Self(letter))
    }

    pub fn letter(&self) -> char {
        self.0
    }

    /// 卷根目录，如 `Z:\`
    pub fn root(&self) -> PathBuf {
        PathBuf::from(format!("{}:\\", self.0))
    }
}

impl std::fmt::Display for DriveLetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.0)
    }
}

impl FromStr for DriveLetter {
    type Err = DriveLetterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// 部署参数（未补全）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    pub destination_drive: Option<DriveLetter>,
    pub efi_drive: Option<DriveLetter>,
    pub disk_number: Option<u32>,
    pub source_drive: Option<DriveLetter>,
    pub image_file_path: Option<PathBuf>,
    pub image_index: Option<u32>,
    pub firmware_type: Option<FirmwareType>,
    pub additional_drivers: Option<PathBuf>,
    /// 在后台工作线程中运行外部工具
    pub multithreaded: bool,
}

impl Parameters {
    /// 目标盘、引导盘、源盘两两不能相同
    pub fn ensure_distinct_drives(&self) -> Result<(), DeployError> {
        let named = [
            ("OS", self.destination_drive),
            ("bootloader", self.efi_drive),
            ("source", self.source_drive),
        ];

        for (i, (first, a)) in named.iter().enumerate() {
            for (second, b) in &named[i + 1..] {
                if let (Some(a), Some(b)) = (a, b) {
                    if a == b {
                        return Err(DeployError::DuplicateDrive {
                            first: *first,
                            second: *second,
                            letter: a.to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// 参数摘要，安装前给用户确认
    pub fn summary(&self) -> String {
        fn show<T: std::fmt::Display>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "(not set)".to_string())
        }

        let drivers = self
            .additional_drivers
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string());
        let image = self
            .image_file_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".to_string());

        format!(
            "Destination drive is set to '{}'\n\
             EFI drive is set to '{}'\n\
             Disk number is set to '{}'\n\
             Source drive is set to '{}'\n\
             Image file is set to '{}'\n\
             Windows edition (Index) is set to '{}'\n\
             Firmware type is set to '{}'\n\
             Additional drivers: {}",
            show(&self.destination_drive),
            show(&self.efi_drive),
            show(&self.disk_number),
            show(&self.source_drive),
            image,
            show(&self.image_index),
            show(&self.firmware_type),
            drivers,
        )
    }
}

/// 校验完成的部署参数，安装流程只消费这个类型
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParameters {
    pub destination_drive: DriveLetter,
    pub efi_drive: DriveLetter,
    pub disk_number: u32,
    pub image_file_path: PathBuf,
    pub image_index: u32,
    pub firmware_type: FirmwareType,
    pub additional_drivers: Option<PathBuf>,
    pub multithreaded: bool,
}

impl TryFrom<&Parameters> for ResolvedParameters {
    type Error = DeployError;

    fn try_from(params: &Parameters) -> Result<Self, Self::Error> {
        let disk_number = params
            .disk_number
            .ok_or(DeployError::MissingParameter("disk number"))?;
        let destination_drive = params
            .destination_drive
            .ok_or(DeployError::MissingParameter("destination drive"))?;
        let efi_drive = params
            .efi_drive
            .ok_or(DeployError::MissingParameter("EFI drive"))?;
        let image_file_path = params
            .image_file_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(DeployError::MissingParameter("image file"))?;
        let image_index = params
            .image_index
            .ok_or(DeployError::MissingParameter("image index"))?;
        let firmware_type = params
            .firmware_type
            .ok_or(DeployError::MissingParameter("firmware type"))?;

        if image_index == 0 {
            return Err(DeployError::InvalidImageIndex(image_index));
        }

        params.ensure_distinct_drives()?;

        Ok(Self {
            destination_drive,
            efi_drive,
            disk_number,
            image_file_path,
            image_index,
            firmware_type,
            additional_drivers: params.additional_drivers.clone(),
            multithreaded: params.multithreaded,
        })
    }
}

impl ResolvedParameters {
    pub fn image_file(&self) -> &Path {
        &self.image_file_path
    }
}
