//! DISM API 封装模块
//!
//! 该模块提供 Windows DISM API (dismapi.dll) 的 Rust 封装，
//! 用于向已释放的离线系统注入驱动。
//!
//! 注意：DISM API 在某些 PE 环境中可能不可用，
//! 调用方应在失败时回退到 dism_exe.rs 中的命令行方式。

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::{null, null_mut};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use libloading::Library;
use serde::{Deserialize, Serialize};

// =============================================================================
// 常量定义
// =============================================================================

/// DISM 日志级别
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DismLogLevel {
    /// 错误级别
    Errors = 0,
    /// 错误和警告
    #[default]
    ErrorsWarnings = 1,
    /// 全部日志
    ErrorsWarningsInfo = 2,
}

// =============================================================================
// 类型定义
// =============================================================================

/// DISM 会话句柄
type DismSession = u32;

/// DismString 结构（DismGetLastErrorMessage 返回）
#[repr(C)]
struct DismString {
    value: *const u16,
}

type FnDismInitialize = unsafe extern "system" fn(
    log_level: u32,
    log_file_path: *const u16,
    scratch_directory: *const u16,
) -> i32;

type FnDismShutdown = unsafe extern "system" fn() -> i32;

type FnDismOpenSession = unsafe extern "system" fn(
    image_path: *const u16,
    windows_directory: *const u16,
    system_drive: *const u16,
    session: *mut DismSession,
) -> i32;

type FnDismCloseSession = unsafe extern "system" fn(session: DismSession) -> i32;

type FnDismAddDriver = unsafe extern "system" fn(
    session: DismSession,
    driver_path: *const u16,
    force_unsigned: i32,
) -> i32;

type FnDismDelete = unsafe extern "system" fn(object: *mut c_void) -> i32;

type FnDismGetLastErrorMessage =
    unsafe extern "system" fn(error_message: *mut *mut DismString) -> i32;

// =============================================================================
// 全局状态
// =============================================================================

static DISM_INITIALIZED: AtomicBool = AtomicBool::new(false);

// =============================================================================
// DISM API 封装
// =============================================================================

/// DISM API 管理器
///
/// 创建时执行 DismInitialize，释放时执行 DismShutdown。
pub struct DismApi {
    _lib: Library,
    shutdown: FnDismShutdown,
    open_session: FnDismOpenSession,
    close_session: FnDismCloseSession,
    add_driver: FnDismAddDriver,
    delete: FnDismDelete,
    get_last_error_message: Option<FnDismGetLastErrorMessage>,
}

impl DismApi {
    /// 加载 dismapi.dll 并初始化 DISM 环境
    pub fn with_log_level(log_level: DismLogLevel) -> Result<Self> {
        let lib = Self::load_dismapi_dll()?;

        let (initialize, shutdown, open_session, close_session, add_driver, delete) = unsafe {
            (
                *lib.get::<FnDismInitialize>(b"DismInitialize")?,
                *lib.get::<FnDismShutdown>(b"DismShutdown")?,
                *lib.get::<FnDismOpenSession>(b"DismOpenSession")?,
                *lib.get::<FnDismCloseSession>(b"DismCloseSession")?,
                *lib.get::<FnDismAddDriver>(b"DismAddDriver")?,
                *lib.get::<FnDismDelete>(b"DismDelete")?,
            )
        };

        // 可选函数
        let get_last_error_message: Option<FnDismGetLastErrorMessage> = unsafe {
            lib.get::<FnDismGetLastErrorMessage>(b"DismGetLastErrorMessage")
                .ok()
                .map(|f| *f)
        };

        if DISM_INITIALIZED.swap(true, Ordering::SeqCst) {
            bail!("DISM API 已被其他实例初始化");
        }

        let scratch_wide = to_wide(&std::env::temp_dir().to_string_lossy());
        let hr = unsafe { initialize(log_level as u32, null(), scratch_wide.as_ptr()) };

        if failed(hr) {
            DISM_INITIALIZED.store(false, Ordering::SeqCst);
            bail!("DISM 初始化失败: HRESULT = 0x{:08X}", hr as u32);
        }

        log::info!("[DISMAPI] DISM 初始化成功 (日志级别: {:?})", log_level);

        // 从这里开始由 Drop 负责 DismShutdown
        Ok(DismApi {
            _lib: lib,
            shutdown,
            open_session,
            close_session,
            add_driver,
            delete,
            get_last_error_message,
        })
    }

    /// 加载 dismapi.dll
    fn load_dismapi_dll() -> Result<Library> {
        let mut paths = vec![PathBuf::from("dismapi.dll")];
        if let Ok(system_root) = std::env::var("SystemRoot") {
            paths.push(PathBuf::from(system_root).join("System32").join("dismapi.dll"));
        }

        for path in &paths {
            if let Ok(lib) = unsafe { Library::new(path) } {
                log::info!("[DISMAPI] 成功加载: {}", path.display());
                return Ok(lib);
            }
        }

        bail!("无法加载 dismapi.dll - DISM API 不可用");
    }

    /// 打开离线镜像会话
    fn open_offline_session(&self, image_root: &Path) -> Result<DismSession> {
        let image_wide = to_wide(&image_root.to_string_lossy());
        let mut session: DismSession = 0;

        let hr = unsafe { (self.open_session)(image_wide.as_ptr(), null(), null(), &mut session) };

        if failed(hr) {
            bail!(
                "打开离线镜像会话失败: {} - HRESULT = 0x{:08X} - {}",
                image_root.display(),
                hr as u32,
                self.get_last_error().unwrap_or_default()
            );
        }

        log::info!("[DISMAPI] 打开会话: {} (Session: {})", image_root.display(), session);
        Ok(session)
    }

    /// 关闭会话
    fn close_session(&self, session: DismSession) {
        let hr = unsafe { (self.close_session)(session) };

        if failed(hr) {
            log::warn!("[DISMAPI] 关闭会话失败: HRESULT = 0x{:08X}", hr as u32);
        } else {
            log::info!("[DISMAPI] 关闭会话: {}", session);
        }
    }

    /// 添加单个驱动（INF 文件）
    fn add_driver(&self, session: DismSession, inf_path: &Path, force_unsigned: bool) -> Result<()> {
        let driver_wide = to_wide(&inf_path.to_string_lossy());

        let hr = unsafe {
            (self.add_driver)(session, driver_wide.as_ptr(), if force_unsigned { 1 } else { 0 })
        };

        if failed(hr) {
            bail!(
                "添加驱动失败: {} - HRESULT = 0x{:08X} - {}",
                inf_path.display(),
                hr as u32,
                self.get_last_error().unwrap_or_default()
            );
        }

        log::info!("[DISMAPI] 驱动添加成功: {}", inf_path.display());
        Ok(())
    }

    /// 将目录下（递归）所有 INF 驱动注入离线系统
    ///
    /// 返回成功注入的驱动数量；任何一个驱动失败都视为整体失败。
    pub fn add_drivers_recursive(
        &self,
        image_root: &Path,
        drivers_dir: &Path,
        force_unsigned: bool,
    ) -> Result<usize> {
        let inf_files = find_inf_files(drivers_dir);
        if inf_files.is_empty() {
            log::warn!("[DISMAPI] 目录中没有 INF 驱动: {}", drivers_dir.display());
            return Ok(0);
        }

        let session = self.open_offline_session(image_root)?;

        let mut added = 0;
        let mut failures = Vec::new();
        for inf in &inf_files {
            match self.add_driver(session, inf, force_unsigned) {
                Ok(_) => added += 1,
                Err(e) => {
                    log::warn!("[DISMAPI] {}", e);
                    failures.push(inf.display().to_string());
                }
            }
        }

        self.close_session(session);

        if !failures.is_empty() {
            bail!(
                "{} / {} 个驱动注入失败: {}",
                failures.len(),
                inf_files.len(),
                failures.join(", ")
            );
        }

        Ok(added)
    }

    /// 获取最后的错误消息
    fn get_last_error(&self) -> Option<String> {
        let get_error = self.get_last_error_message?;

        let mut message: *mut DismString = null_mut();
        let hr = unsafe { get_error(&mut message) };

        if failed(hr) || message.is_null() {
            return None;
        }

        let text = unsafe { wide_to_string((*message).value) };
        unsafe { (self.delete)(message as *mut c_void) };
        Some(text)
    }
}

impl Drop for DismApi {
    fn drop(&mut self) {
        let hr = unsafe { (self.shutdown)() };
        if failed(hr) {
            log::warn!("[DISMAPI] DismShutdown 失败: HRESULT = 0x{:08X}", hr as u32);
        } else {
            log::info!("[DISMAPI] DISM 已关闭");
        }
        DISM_INITIALIZED.store(false, Ordering::SeqCst);
    }
}

/// 便捷函数：初始化 DISM API 并注入目录下的全部驱动
pub fn add_drivers_offline(
    image_root: &Path,
    drivers_dir: &Path,
    force_unsigned: bool,
    log_level: DismLogLevel,
) -> Result<usize> {
    let api = DismApi::with_log_level(log_level).context("DISM API 不可用")?;
    api.add_drivers_recursive(image_root, drivers_dir, force_unsigned)
}

// =============================================================================
// 辅助函数
// =============================================================================

/// 递归查找目录中的所有 INF 文件
pub fn find_inf_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("inf"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

/// HRESULT 最高位为 1 表示失败；S_FALSE 等正值同样是成功
fn failed(hr: i32) -> bool {
    hr < 0
}

/// 将 Rust 字符串转换为以 NUL 结尾的 UTF-16 Vec
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

/// 将 UTF-16 指针转换为 Rust 字符串
///
/// # Safety
/// `ptr` 必须为空或指向以 NUL 结尾的 UTF-16 字符串
unsafe fn wide_to_string(ptr: *const u16) -> String {
    if ptr.is_null() {
        return String::new();
    }

    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    let slice = std::slice::from_raw_parts(ptr, len);
    String::from_utf16_lossy(slice)
}
