//! 安装镜像定位与信息查询
//!
//! 版本列表优先来自 `dism /Get-ImageInfo`，失败时直接解析 WIM 头中的 XML 元数据。

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::core::dism_exe::{extract_error_from_output, DismExe};
use crate::core::error::DeployError;
use crate::core::host::{execute, require_admin, Host};

/// 镜像中的一个 Windows 版本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub index: u32,
    pub name: String,
    pub description: String,
    pub size_bytes: u64,
    /// 只有 XML 元数据中才有
    pub architecture: Option<String>,
}

/// 在源盘根目录下查找安装镜像
///
/// 顺序：`sources\install.esd`，`sources\install.wim`，
/// 然后是 `sources\` 下其他名称含 install 的 .esd / .wim 文件。
pub fn locate_install_image(source_root: &Path) -> Result<PathBuf, DeployError> {
    let sources = source_root.join("sources");

    for name in ["install.esd", "install.wim"] {
        let candidate = sources.join(name);
        if candidate.is_file() {
            log::info!("找到安装镜像: {}", candidate.display());
            return Ok(candidate);
        }
    }

    let mut others: Vec<PathBuf> = std::fs::read_dir(&sources)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && is_install_image_name(p))
                .collect()
        })
        .unwrap_or_default();
    others.sort();

    match others.into_iter().next() {
        Some(found) => {
            log::info!("找到安装镜像: {}", found.display());
            Ok(found)
        }
        None => {
            log::warn!("未找到安装镜像: {}", sources.display());
            Err(DeployError::ImageNotFound(sources))
        }
    }
}

fn is_install_image_name(path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy().to_lowercase();
    name.contains("install") && (name.ends_with(".esd") || name.ends_with(".wim"))
}

/// 获取镜像中的全部版本
pub fn get_image_info<H: Host>(host: &H, image_file: &Path) -> Result<Vec<ImageInfo>> {
    if !image_file.is_file() {
        return Err(DeployError::ImageNotFound(image_file.to_path_buf()).into());
    }

    match query_with_dism(host, image_file) {
        Ok(images) if !images.is_empty() => {
            log::info!("[DISM.EXE] 获取到 {} 个镜像版本", images.len());
            return Ok(images);
        }
        Ok(_) => log::warn!("[DISM.EXE] /Get-ImageInfo 没有返回任何版本"),
        Err(e) => log::warn!("[DISM.EXE] /Get-ImageInfo 失败: {:#}", e),
    }

    match parse_wim_xml_metadata(image_file) {
        Ok(images) if !images.is_empty() => {
            log::info!("从 WIM XML 元数据解析出 {} 个镜像版本", images.len());
            Ok(images)
        }
        Ok(_) => Err(DeployError::NoImages(image_file.to_path_buf()).into()),
        Err(e) => {
            log::warn!("解析 WIM XML 元数据失败: {:#}", e);
            Err(DeployError::NoImages(image_file.to_path_buf()).into())
        }
    }
}

fn query_with_dism<H: Host>(host: &H, image_file: &Path) -> Result<Vec<ImageInfo>> {
    // dism.exe 需要提升权限，否则只能读取 XML 元数据
    require_admin(host, "query images with DISM")?;

    let output = execute(host, DismExe::new().get_image_info(image_file), false)?;
    if !output.success() {
        bail!(
            "dism 退出码 {:?}: {}",
            output.exit_code,
            extract_error_from_output(&output.stdout)
        );
    }
    Ok(parse_dism_image_info(&output.stdout))
}

/// 解析 `dism /English /Get-ImageInfo` 的输出
///
/// ```text
/// Index : 1
/// Name : Windows 10 Home
/// Description : Windows 10 Home
/// Size : 14,475,602,191 bytes
/// ```
pub fn parse_dism_image_info(output: &str) -> Vec<ImageInfo> {
    let mut images = Vec::new();
    let mut current: Option<ImageInfo> = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "Index" => {
                if let Some(done) = current.take() {
                    images.push(done);
                }
                current = value.parse().ok().map(|index| ImageInfo {
                    index,
                    name: String::new(),
                    description: String::new(),
                    size_bytes: 0,
                    architecture: None,
                });
            }
            "Name" => {
                if let Some(image) = current.as_mut() {
                    image.name = value.to_string();
                }
            }
            "Description" => {
                if let Some(image) = current.as_mut() {
                    image.description = value.to_string();
                }
            }
            "Size" => {
                if let Some(image) = current.as_mut() {
                    image.size_bytes = parse_size_bytes(value);
                }
            }
            _ => {}
        }
    }

    if let Some(done) = current {
        images.push(done);
    }
    images
}

/// "14,475,602,191 bytes" -> 14475602191（千位分隔符随区域设置不同）
fn parse_size_bytes(value: &str) -> u64 {
    value
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

/// 直接解析 WIM/ESD 文件头中的 XML 元数据
fn parse_wim_xml_metadata(image_file: &Path) -> Result<Vec<ImageInfo>> {
    log::info!("尝试直接解析 WIM XML 元数据: {}", image_file.display());

    let mut file = File::open(image_file)
        .with_context(|| format!("打开镜像失败: {}", image_file.display()))?;

    // WIM 文件头 208 字节
    let mut header = [0u8; 208];
    file.read_exact(&mut header).context("读取 WIM 文件头失败")?;

    if &header[0..8] != b"MSWIM\0\0\0" {
        bail!("不是有效的 WIM 文件");
    }

    // 偏移 48 为查找表资源头，偏移 72 为 XML 数据资源头
    let (xml_size, xml_offset) = read_resource_header(&header[72..96]);

    if xml_offset == 0 || xml_size == 0 || xml_size > 100_000_000 {
        bail!("XML 元数据位置无效");
    }

    log::debug!("XML 偏移: {}, 大小: {}", xml_offset, xml_size);

    file.seek(SeekFrom::Start(xml_offset))
        .with_context(|| format!("定位 XML 元数据失败 (偏移 {})", xml_offset))?;
    let mut xml_data = vec![0u8; xml_size as usize];
    file.read_exact(&mut xml_data).context("读取 XML 元数据失败")?;

    Ok(parse_wim_xml(&decode_utf16le(&xml_data)?))
}

/// 解析 24 字节的资源头，返回 (存储大小, 偏移)
///
/// 布局: 7 字节大小 + 1 字节标志，8 字节偏移，8 字节原始大小
fn read_resource_header(reshdr: &[u8]) -> (u64, u64) {
    let mut size_bytes = [0u8; 8];
    size_bytes[..7].copy_from_slice(&reshdr[0..7]);
    let mut offset_bytes = [0u8; 8];
    offset_bytes.copy_from_slice(&reshdr[8..16]);
    (
        u64::from_le_bytes(size_bytes),
        u64::from_le_bytes(offset_bytes),
    )
}

/// UTF-16LE（可带 BOM）转换为 String
fn decode_utf16le(data: &[u8]) -> Result<String> {
    let data = data.strip_prefix(&[0xFF, 0xFE]).unwrap_or(data);

    let mut units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    while units.last() == Some(&0) {
        units.pop();
    }

    String::from_utf16(&units).map_err(|e| anyhow::anyhow!("UTF-16 解码失败: {}", e))
}

fn parse_wim_xml(xml: &str) -> Vec<ImageInfo> {
    const IMAGE_OPEN: &str = "<IMAGE INDEX=\"";
    const IMAGE_CLOSE: &str = "</IMAGE>";

    let mut images = Vec::new();
    let mut pos = 0;

    while let Some(start) = xml[pos..].find(IMAGE_OPEN) {
        let index_start = pos + start + IMAGE_OPEN.len();
        let Some(index_len) = xml[index_start..].find('"') else {
            break;
        };
        let Some(block_len) = xml[index_start..].find(IMAGE_CLOSE) else {
            break;
        };

        let index: u32 = xml[index_start..index_start + index_len].parse().unwrap_or(0);
        let block = &xml[index_start..index_start + block_len];
        pos = index_start + block_len + IMAGE_CLOSE.len();

        if index == 0 {
            continue;
        }

        let name = extract_xml_tag(block, "DISPLAYNAME")
            .or_else(|| extract_xml_tag(block, "NAME"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("Image {}", index));
        let description = extract_xml_tag(block, "DISPLAYDESCRIPTION")
            .or_else(|| extract_xml_tag(block, "DESCRIPTION"))
            .unwrap_or_default();
        let size_bytes = extract_xml_tag(block, "TOTALBYTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let architecture = extract_xml_tag(block, "ARCH").map(|a| arch_name(&a));

        images.push(ImageInfo {
            index,
            name,
            description,
            size_bytes,
            architecture,
        });
    }

    images
}

/// PROCESSOR_ARCHITECTURE_* 数值转换为名称
fn arch_name(value: &str) -> String {
    match value.trim() {
        "0" => "x86".to_string(),
        "5" => "arm".to_string(),
        "6" => "ia64".to_string(),
        "9" => "x64".to_string(),
        "12" => "arm64".to_string(),
        other => other.to_string(),
    }
}

fn extract_xml_tag(xml: &str, tag: &str) -> Option<String> {
    let open_tag = format!("<{}>", tag);
    let close_tag = format!("</{}>", tag);

    let content_start = xml.find(&open_tag)? + open_tag.len();
    let end = xml[content_start..].find(&close_tag)?;
    Some(xml[content_start..content_start + end].trim().to_string())
}

/// 打印镜像中的全部版本
pub fn print_image_info(image_file: &Path, images: &[ImageInfo]) {
    println!(
        "Found {} image(s) in {}",
        images.len(),
        image_file.display()
    );
    for image in images {
        println!();
        println!("  Index: {}", image.index);
        println!("  Name: {}", image.name);
        if !image.description.is_empty() && image.description != image.name {
            println!("  Description: {}", image.description);
        }
        println!(
            "  Size: {:.2} GB",
            image.size_bytes as f64 / 1024.0 / 1024.0 / 1024.0
        );
        if let Some(arch) = &image.architecture {
            println!("  Arch: {}", arch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::host::testing::RecordingHost;

    const DISM_OUTPUT: &str = "\
Deployment Image Servicing and Management tool
Version: 10.0.22621.1

Details for image : D:\\sources\\install.wim

Index : 1
Name : Windows 11 Home
Description : Windows 11 Home
Size : 16,212,353,401 bytes

Index : 6
Name : Windows 11 Pro
Description : Windows 11 Pro
Size : 16,498,113,226 bytes

The operation completed successfully.
";

    fn fake_wim(xml: &str) -> Vec<u8> {
        let mut xml_bytes = vec![0xFF, 0xFE];
        for unit in xml.encode_utf16() {
            xml_bytes.extend_from_slice(&unit.to_le_bytes());
        }

        // 查找表放在文件头之后，XML 紧随其后
        let lookup_table = [0u8; 50];
        let lookup_offset = 208u64;
        let xml_offset = lookup_offset + lookup_table.len() as u64;

        let mut data = vec![0u8; 208];
        data[0..8].copy_from_slice(b"MSWIM\0\0\0");
        data[8..12].copy_from_slice(&208u32.to_le_bytes());
        write_resource_header(&mut data[48..72], lookup_table.len() as u64, 0x02, lookup_offset);
        write_resource_header(&mut data[72..96], xml_bytes.len() as u64, 0x00, xml_offset);
        data.extend_from_slice(&lookup_table);
        data.extend_from_slice(&xml_bytes);
        data
    }

    fn write_resource_header(reshdr: &mut [u8], size: u64, flags: u8, offset: u64) {
        reshdr[0..7].copy_from_slice(&size.to_le_bytes()[..7]);
        reshdr[7] = flags;
        reshdr[8..16].copy_from_slice(&offset.to_le_bytes());
        reshdr[16..24].copy_from_slice(&size.to_le_bytes());
    }

    #[test]
    fn test_read_resource_header_masks_flags() {
        let mut reshdr = [0u8; 24];
        write_resource_header(&mut reshdr, 0x1234, 0x02, 0x8000_0000_1000);
        assert_eq!(read_resource_header(&reshdr), (0x1234, 0x8000_0000_1000));
    }

    #[test]
    fn test_parse_wim_xml_metadata_skips_lookup_table() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("install.wim");
        std::fs::write(&image, fake_wim(WIM_XML)).unwrap();

        let images = parse_wim_xml_metadata(&image).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].name, "Windows 10 Pro");
        assert_eq!(images[1].index, 2);
    }

    const WIM_XML: &str = "<WIM><TOTALBYTES>999</TOTALBYTES>\
        <IMAGE INDEX=\"1\"><TOTALBYTES>1073741824</TOTALBYTES>\
        <WINDOWS><ARCH>9</ARCH></WINDOWS>\
        <NAME>Windows 10 Pro</NAME><DESCRIPTION>Windows 10 Pro</DESCRIPTION>\
        <DISPLAYNAME>Windows 10 专业版</DISPLAYNAME></IMAGE>\
        <IMAGE INDEX=\"2\"><TOTALBYTES>2048</TOTALBYTES>\
        <WINDOWS><ARCH>12</ARCH></WINDOWS><NAME>Windows 10 Home</NAME></IMAGE></WIM>";

    #[test]
    fn test_locate_prefers_esd() {
        let dir = tempfile::tempdir().unwrap();
        let sources = dir.path().join("sources");
        std::fs::create_dir(&sources).unwrap();
        std::fs::write(sources.join("install.wim"), b"").unwrap();
        std::fs::write(sources.join("install.esd"), b"").unwrap();

        assert_eq!(
            locate_install_image(dir.path()).unwrap(),
            sources.join("install.esd")
        );
    }

    #[test]
    fn test_locate_falls_back_to_other_install_images() {
        let dir = tempfile::tempdir().unwrap();
        let sources = dir.path().join("sources");
        std::fs::create_dir(&sources).unwrap();
        std::fs::write(sources.join("boot.wim"), b"").unwrap();
        std::fs::write(sources.join("Install_Pro.WIM"), b"").unwrap();

        assert_eq!(
            locate_install_image(dir.path()).unwrap(),
            sources.join("Install_Pro.WIM")
        );
    }

    #[test]
    fn test_locate_reports_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            locate_install_image(dir.path()),
            Err(DeployError::ImageNotFound(_))
        ));
    }

    #[test]
    fn test_parse_dism_output() {
        let images = parse_dism_image_info(DISM_OUTPUT);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].index, 1);
        assert_eq!(images[0].name, "Windows 11 Home");
        assert_eq!(images[0].size_bytes, 16_212_353_401);
        assert_eq!(images[1].index, 6);
        assert_eq!(images[1].description, "Windows 11 Pro");
        assert_eq!(images[1].architecture, None);
    }

    #[test]
    fn test_parse_wim_xml() {
        let images = parse_wim_xml(WIM_XML);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].name, "Windows 10 专业版");
        assert_eq!(images[0].size_bytes, 1_073_741_824);
        assert_eq!(images[0].architecture.as_deref(), Some("x64"));
        assert_eq!(images[1].name, "Windows 10 Home");
        assert_eq!(images[1].architecture.as_deref(), Some("arm64"));
    }

    #[test]
    fn test_get_image_info_uses_dism_output() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("install.wim");
        std::fs::write(&image, b"not a wim").unwrap();

        let host = RecordingHost::new();
        host.respond("dism", Some(0), DISM_OUTPUT);

        let images = get_image_info(&host, &image).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(host.tool_names(), vec!["dism"]);
    }

    #[test]
    fn test_get_image_info_falls_back_to_xml() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("install.wim");
        std::fs::write(&image, fake_wim(WIM_XML)).unwrap();

        let host = RecordingHost::new();
        host.respond("dism", Some(2), "Error: 2\n\nThe system cannot find the file specified.");

        let images = get_image_info(&host, &image).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].architecture.as_deref(), Some("x64"));
    }

    #[test]
    fn test_get_image_info_unelevated_reads_xml_only() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("install.wim");
        std::fs::write(&image, fake_wim(WIM_XML)).unwrap();

        let mut host = RecordingHost::new();
        host.admin = false;

        let images = get_image_info(&host, &image).unwrap();
        assert_eq!(images.len(), 2);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_get_image_info_without_images() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("install.wim");
        std::fs::write(&image, fake_wim("<WIM></WIM>")).unwrap();

        let host = RecordingHost::new();
        let err = get_image_info(&host, &image).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::NoImages(_))
        ));
    }

    #[test]
    fn test_get_image_info_missing_file() {
        let host = RecordingHost::new();
        let err = get_image_info(&host, Path::new("/nonexistent/install.wim")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::ImageNotFound(_))
        ));
        assert!(host.calls().is_empty());
    }
}
