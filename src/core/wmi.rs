//! WMI 查询辅助模块 - 纯 WinAPI COM 实现
//!
//! 只在 Windows 下编译，供磁盘枚举使用。

use anyhow::{Context, Result};
use windows::core::{BSTR, VARIANT};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoInitializeSecurity, CoSetProxyBlanket, CoUninitialize,
    CLSCTX_INPROC_SERVER, COINIT_MULTITHREADED, EOAC_NONE, RPC_C_AUTHN_LEVEL_CALL,
    RPC_C_AUTHN_LEVEL_DEFAULT, RPC_C_IMP_LEVEL_IMPERSONATE,
};
use windows::Win32::System::Variant::{
    VARENUM, VT_BSTR, VT_EMPTY, VT_I4, VT_I8, VT_NULL, VT_UI4, VT_UI8,
};
use windows::Win32::System::Wmi::{
    IEnumWbemClassObject, IWbemClassObject, IWbemLocator, IWbemServices, WbemLocator,
    WBEM_FLAG_FORWARD_ONLY, WBEM_FLAG_RETURN_IMMEDIATELY,
};

// RPC 常量定义
const RPC_C_AUTHN_DEFAULT: u32 = 0xFFFFFFFF;
const RPC_C_AUTHZ_NONE: u32 = 0;

/// COM 初始化守卫，确保 COM 正确初始化和清理
pub struct ComInitGuard {
    initialized: bool,
}

impl ComInitGuard {
    pub fn new() -> Self {
        let initialized = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED).is_ok() };
        if initialized {
            // 进程内只能成功一次，重复调用的 RPC_E_TOO_LATE 可以忽略
            let _ = unsafe {
                CoInitializeSecurity(
                    None,
                    -1,
                    None,
                    None,
                    RPC_C_AUTHN_LEVEL_DEFAULT,
                    RPC_C_IMP_LEVEL_IMPERSONATE,
                    None,
                    EOAC_NONE,
                    None,
                )
            };
        }
        Self { initialized }
    }
}

impl Drop for ComInitGuard {
    fn drop(&mut self) {
        if self.initialized {
            unsafe { CoUninitialize() };
        }
    }
}

/// WMI 连接
pub struct WmiConnection {
    services: IWbemServices,
}

impl WmiConnection {
    /// 连接到 root\cimv2 命名空间
    pub fn connect_cimv2() -> Result<Self> {
        unsafe {
            let locator: IWbemLocator = CoCreateInstance(&WbemLocator, None, CLSCTX_INPROC_SERVER)
                .context("创建 WbemLocator 失败")?;

            let services = locator
                .ConnectServer(
                    &BSTR::from("ROOT\\CIMV2"),
                    &BSTR::new(),
                    &BSTR::new(),
                    &BSTR::new(),
                    0,
                    &BSTR::new(),
                    None,
                )
                .context("连接 ROOT\\CIMV2 失败")?;

            CoSetProxyBlanket(
                &services,
                RPC_C_AUTHN_DEFAULT,
                RPC_C_AUTHZ_NONE,
                None,
                RPC_C_AUTHN_LEVEL_CALL,
                RPC_C_IMP_LEVEL_IMPERSONATE,
                None,
                EOAC_NONE,
            )
            .context("CoSetProxyBlanket 失败")?;

            log::debug!("[WMI] 已连接 ROOT\\CIMV2");
            Ok(Self { services })
        }
    }

    /// 执行 WQL 查询
    pub fn query(&self, wql: &str) -> Result<WmiQueryResult> {
        log::debug!("[WMI] 查询: {}", wql);
        let enumerator = unsafe {
            self.services.ExecQuery(
                &BSTR::from("WQL"),
                &BSTR::from(wql),
                WBEM_FLAG_FORWARD_ONLY | WBEM_FLAG_RETURN_IMMEDIATELY,
                None,
            )
        }
        .with_context(|| format!("WMI 查询失败: {}", wql))?;

        Ok(WmiQueryResult { enumerator })
    }
}

/// WMI 查询结果迭代器
pub struct WmiQueryResult {
    enumerator: IEnumWbemClassObject,
}

impl Iterator for WmiQueryResult {
    type Item = WmiObject;

    fn next(&mut self) -> Option<Self::Item> {
        let mut objects: [Option<IWbemClassObject>; 1] = [None];
        let mut returned: u32 = 0;

        // 5秒超时，避免无限等待
        let result = unsafe { self.enumerator.Next(5000, &mut objects, &mut returned) };

        if result.is_ok() && returned > 0 {
            objects[0].take().map(|inner| WmiObject { inner })
        } else {
            None
        }
    }
}

/// WMI 对象
pub struct WmiObject {
    inner: IWbemClassObject,
}

impl WmiObject {
    fn get(&self, property: &str) -> Option<VARIANT> {
        let mut value = VARIANT::default();
        let result = unsafe {
            self.inner
                .Get(&BSTR::from(property), 0, &mut value, None, None)
        };
        result.ok().map(|_| value)
    }

    pub fn get_string(&self, property: &str) -> Option<String> {
        self.get(property).and_then(|v| variant_to_string(&v))
    }

    pub fn get_u32(&self, property: &str) -> Option<u32> {
        self.get(property)
            .and_then(|v| variant_to_u64(&v))
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Win32_DiskDrive.Size 是以字符串表示的 uint64
    pub fn get_u64(&self, property: &str) -> Option<u64> {
        self.get(property).and_then(|v| variant_to_u64(&v))
    }
}

/// VARIANT 前 2 字节是 vt
#[inline]
fn get_variant_vt(var: &VARIANT) -> VARENUM {
    unsafe {
        let var_ptr = var as *const VARIANT as *const u16;
        VARENUM(*var_ptr)
    }
}

fn variant_to_string(var: &VARIANT) -> Option<String> {
    let vt = get_variant_vt(var);

    if vt == VT_NULL || vt == VT_EMPTY {
        return None;
    }

    if vt == VT_BSTR {
        return BSTR::try_from(var)
            .ok()
            .map(|b| b.to_string())
            .filter(|s| !s.is_empty());
    }

    variant_to_u64(var).map(|v| v.to_string())
}

fn variant_to_u64(var: &VARIANT) -> Option<u64> {
    let vt = get_variant_vt(var);

    if vt == VT_I4 {
        return i32::try_from(var).ok().map(|v| v as u64);
    }
    if vt == VT_UI4 {
        return u32::try_from(var).ok().map(u64::from);
    }
    if vt == VT_I8 {
        return i64::try_from(var).ok().map(|v| v as u64);
    }
    if vt == VT_UI8 {
        return u64::try_from(var).ok();
    }
    if vt == VT_BSTR {
        return BSTR::try_from(var)
            .ok()
            .and_then(|b| b.to_string().trim().parse().ok());
    }

    None
}

