//! 程序配置模块
//! 管理程序目录下的 config.json，存储日志和部署偏好设置

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::dismapi::DismLogLevel;
use crate::utils::path::get_exe_dir;

/// 部署配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// 是否启用日志记录（默认启用）
    #[serde(default = "default_log_enabled")]
    pub log_enabled: bool,

    /// 日志保留天数（默认7天）
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,

    /// EFI 系统分区大小（MB）
    #[serde(default = "default_efi_partition_size_mb")]
    pub efi_partition_size_mb: u32,

    /// MSR 分区大小（MB）
    #[serde(default = "default_msr_partition_size_mb")]
    pub msr_partition_size_mb: u32,

    /// 释放镜像时附加 /Verify
    #[serde(default = "default_verify_image")]
    pub verify_image: bool,

    /// 允许注入未签名驱动
    #[serde(default)]
    pub force_unsigned_drivers: bool,

    /// DISM API 日志级别
    #[serde(default)]
    pub dism_log_level: DismLogLevel,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_efi_partition_size_mb() -> u32 {
    100
}

fn default_msr_partition_size_mb() -> u32 {
    16
}

fn default_verify_image() -> bool {
    true
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            log_enabled: default_log_enabled(),
            log_retention_days: default_log_retention_days(),
            efi_partition_size_mb: default_efi_partition_size_mb(),
            msr_partition_size_mb: default_msr_partition_size_mb(),
            verify_image: default_verify_image(),
            force_unsigned_drivers: false,
            dism_log_level: DismLogLevel::default(),
        }
    }
}

impl DeployConfig {
    /// 获取配置文件路径
    pub fn get_config_path() -> PathBuf {
        get_exe_dir().join("config.json")
    }

    /// 从文件加载配置
    ///
    /// 在日志系统初始化之前调用，文件不存在或解析失败时静默返回默认配置
    pub fn load() -> Self {
        Self::load_from(&Self::get_config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<DeployConfig>(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// 保存配置到文件
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::get_config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("写入配置文件失败: {}", path.display()))?;
        log::info!("配置已保存: {}", path.display());
        Ok(())
    }
}
