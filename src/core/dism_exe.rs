//! DISM.exe 命令行封装模块
//!
//! 构造 dism.exe 的调用参数：
//! - 释放镜像 /Apply-Image
//! - 查询镜像 /Get-ImageInfo
//! - 离线驱动导入 /Add-Driver（DISM API 不可用时的回退方案）
//!
//! 命令由 `Host` 执行，这里只负责定位 dism.exe 和拼装参数。

use std::path::{Path, PathBuf};

use crate::core::parameters::DriveLetter;
use crate::core::process::ToolCommand;
use crate::utils::path::resolve_tool;

/// DISM.exe 命令构造器
#[derive(Debug, Clone)]
pub struct DismExe {
    dism_path: PathBuf,
}

impl DismExe {
    pub fn new() -> Self {
        let dism_path = Self::find_dism_exe();
        log::debug!("[DISM.EXE] 使用 dism.exe: {}", dism_path.display());
        Self { dism_path }
    }

    /// 查找可用的 dism.exe
    ///
    /// 按照优先级查找：
    /// 1. 程序目录下的 bin\dism.exe
    /// 2. 系统目录 (%SystemRoot%\System32\dism.exe)
    /// 3. PE 环境 (X:\Windows\System32\dism.exe)
    /// 4. PATH 环境变量
    fn find_dism_exe() -> PathBuf {
        let resolved = resolve_tool("dism.exe");
        if resolved.is_absolute() {
            return resolved;
        }

        let pe_path = PathBuf::from(r"X:\Windows\System32\dism.exe");
        if pe_path.exists() {
            return pe_path;
        }

        resolved
    }

    fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.dism_path)
    }

    /// 释放镜像到目标分区
    pub fn apply_image(
        &self,
        image_file: &Path,
        index: u32,
        destination: DriveLetter,
        verify: bool,
    ) -> ToolCommand {
        let mut cmd = self.command().args([
            "/Apply-Image".to_string(),
            format!("/ImageFile:{}", image_file.display()),
            format!("/ApplyDir:{}\\", destination),
            format!("/Index:{}", index),
        ]);
        if verify {
            cmd = cmd.arg("/Verify");
        }
        cmd
    }

    /// 查询镜像中的所有版本（输出被捕获用于解析）
    pub fn get_image_info(&self, image_file: &Path) -> ToolCommand {
        self.command()
            .args([
                "/English".to_string(),
                "/Get-ImageInfo".to_string(),
                format!("/ImageFile:{}", image_file.display()),
            ])
            .capture()
    }

    /// 递归导入驱动目录到离线系统
    pub fn add_driver(
        &self,
        destination: DriveLetter,
        driver_dir: &Path,
        force_unsigned: bool,
    ) -> ToolCommand {
        let mut cmd = self.command().args([
            format!("/Image:{}\\", destination),
            "/Add-Driver".to_string(),
            format!("/Driver:{}", driver_dir.display()),
            "/Recurse".to_string(),
        ]);
        if force_unsigned {
            cmd = cmd.arg("/ForceUnsigned");
        }
        cmd
    }
}

impl Default for DismExe {
    fn default() -> Self {
        Self::new()
    }
}

/// 从 DISM 输出中提取错误信息
pub fn extract_error_from_output(output: &str) -> String {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();

    for (i, line) in lines.iter().enumerate() {
        if line.to_lowercase().contains("error") {
            // 错误行及后续两行作为上下文
            let end = (i + 3).min(lines.len());
            return lines[i..end].join("\n");
        }
    }

    let start = lines.len().saturating_sub(5);
    lines[start..].join("\n")
}
