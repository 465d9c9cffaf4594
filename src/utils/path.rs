use std::path::PathBuf;

/// 获取程序所在目录
pub fn get_exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// 获取 bin 目录路径（随程序分发的 diskpart / dism / bcdboot）
pub fn get_bin_dir() -> PathBuf {
    get_exe_dir().join("bin")
}

/// 查找外部工具
///
/// 优先级：`bin\<tool>` > `%SystemRoot%\System32\<tool>` > 直接使用名称（交给 PATH）
pub fn resolve_tool(file_name: &str) -> PathBuf {
    let bundled = get_bin_dir().join(file_name);
    if bundled.exists() {
        log::debug!("使用内置工具: {}", bundled.display());
        return bundled;
    }

    if let Ok(system_root) = std::env::var("SystemRoot") {
        let system_path = PathBuf::from(system_root).join("System32").join(file_name);
        if system_path.exists() {
            return system_path;
        }
    }

    PathBuf::from(file_name)
}
