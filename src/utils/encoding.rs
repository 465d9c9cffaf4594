use encoding_rs::WINDOWS_1252;

/// 将控制台输出转换为 UTF-8 字符串
///
/// diskpart / dism 按控制台代码页输出，合法 UTF-8 直接使用，否则按 Windows-1252 解码
pub fn console_to_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (cow, _, _) = WINDOWS_1252.decode(bytes);
            cow.into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_passthrough() {
        assert_eq!(console_to_utf8("Index : 1".as_bytes()), "Index : 1");
    }

    #[test]
    fn test_legacy_code_page() {
        // 0xE9 在 Windows-1252 中是 é
        assert_eq!(console_to_utf8(&[b'c', b'a', b'f', 0xE9]), "café");
    }
}
