//! 固件类型检测（UEFI / BIOS）

use std::str::FromStr;

/// 固件类型，决定 bcdboot 的 `/f` 参数和分区布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareType {
    Uefi,
    Bios,
}

impl FirmwareType {
    /// bcdboot `/f` 参数值
    pub fn as_bcdboot_arg(&self) -> &'static str {
        match self {
            FirmwareType::Uefi => "UEFI",
            FirmwareType::Bios => "BIOS",
        }
    }
}

impl std::fmt::Display for FirmwareType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_bcdboot_arg())
    }
}

impl FromStr for FirmwareType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UEFI" | "EFI" => Ok(FirmwareType::Uefi),
            "BIOS" | "LEGACY" => Ok(FirmwareType::Bios),
            other => Err(format!(
                "unknown firmware type '{}', expected UEFI or BIOS",
                other
            )),
        }
    }
}

/// 直接调用 kernel32.dll 的 GetFirmwareEnvironmentVariableW
#[cfg(windows)]
mod kernel32 {
    #[link(name = "kernel32")]
    extern "system" {
        pub fn GetFirmwareEnvironmentVariableW(
            lpName: *const u16,
            lpGuid: *const u16,
            pBuffer: *mut u8,
            nSize: u32,
        ) -> u32;
    }
}

/// ERROR_INVALID_FUNCTION：Legacy BIOS 不支持固件环境变量
#[cfg(windows)]
const ERROR_INVALID_FUNCTION: i32 = 1;

/// 检测当前系统的固件类型
///
/// 查询一个不存在的固件变量：Legacy BIOS 下返回 ERROR_INVALID_FUNCTION，
/// UEFI 下返回其他错误（ERROR_NOACCESS / ERROR_ENVVAR_NOT_FOUND）。
#[cfg(windows)]
pub fn detect_firmware_type() -> FirmwareType {
    let name: Vec<u16> = "".encode_utf16().chain(std::iter::once(0)).collect();
    let guid: Vec<u16> = "{00000000-0000-0000-0000-000000000000}"
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();
    let mut buffer = [0u8; 1];

    let result = unsafe {
        kernel32::GetFirmwareEnvironmentVariableW(
            name.as_ptr(),
            guid.as_ptr(),
            buffer.as_mut_ptr(),
            buffer.len() as u32,
        )
    };

    if result != 0 {
        return FirmwareType::Uefi;
    }

    let raw_error = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    log::debug!("GetFirmwareEnvironmentVariableW 错误码: {}", raw_error);

    if raw_error == ERROR_INVALID_FUNCTION {
        FirmwareType::Bios
    } else {
        FirmwareType::Uefi
    }
}

#[cfg(not(windows))]
pub fn detect_firmware_type() -> FirmwareType {
    FirmwareType::Bios
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_firmware_type() {
        assert_eq!("uefi".parse::<FirmwareType>(), Ok(FirmwareType::Uefi));
        assert_eq!(" BIOS ".parse::<FirmwareType>(), Ok(FirmwareType::Bios));
        assert_eq!("Legacy".parse::<FirmwareType>(), Ok(FirmwareType::Bios));
        assert!("coreboot".parse::<FirmwareType>().is_err());
    }

    #[test]
    fn test_bcdboot_arg() {
        assert_eq!(FirmwareType::Uefi.to_string(), "UEFI");
        assert_eq!(FirmwareType::Bios.as_bcdboot_arg(), "BIOS");
    }
}
