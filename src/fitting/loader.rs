//! # 拍摄加载模块
//!
//! ## 设计思路
//!
//! 拍摄组件交付的可能是本地文件、`data:image/...;base64,` URL 或裸 base64 文本。
//! 统一在这里转成 [`EncodedImage`]，并在尽可能早的阶段校验，尽快失败。
//!
//! ## 实现思路
//!
//! - 文件：存在性 + metadata 体积限制 + 读取。
//! - Base64：先按长度估算解码体积，超限直接拒绝，再解码。
//! - 最后统一通过文件签名识别 MIME、读取头信息尺寸。

use std::path::Path;

use base64::{Engine as _, engine::general_purpose};

use super::{EncodedImage, FittingConfig, ImageError};

const DATA_URL_PREFIX: &str = "data:image/";
const BASE64_MARKER: &str = ";base64,";

/// 拍摄图片加载器。
#[derive(Debug, Clone, Copy)]
pub struct CaptureLoader {
    max_capture_bytes: u64,
}

impl CaptureLoader {
    pub fn new(max_capture_bytes: u64) -> Self {
        Self { max_capture_bytes }
    }

    pub fn from_config(config: &FittingConfig) -> Self {
        Self::new(config.max_capture_bytes)
    }

    /// 自动识别输入形式：data URL、文件路径，否则按裸 base64 处理。
    ///
    /// 含有 base64 字母表之外字符（如 `.`、`\`）的输入一定是路径，
    /// 即使文件不存在也按路径报错。
    pub fn load(&self, input: &str) -> Result<EncodedImage, ImageError> {
        let trimmed = input.trim();
        if trimmed.starts_with(DATA_URL_PREFIX) {
            return self.load_base64(trimmed);
        }
        if Path::new(trimmed).is_file() || !is_base64_text(trimmed) {
            return self.load_file(trimmed);
        }
        self.load_base64(trimmed)
    }

    /// 从本地路径加载。
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EncodedImage, ImageError> {
        let file_path = path.as_ref();
        log::info!("📁 读取拍摄图片 - 路径: {}", file_path.display());

        if !file_path.exists() {
            return Err(ImageError::FileSystem(format!("文件不存在：{}", file_path.display())));
        }

        let metadata = std::fs::metadata(file_path)
            .map_err(|e| ImageError::FileSystem(format!("无法读取文件信息：{}", e)))?;
        self.check_size(metadata.len(), "文件过大")?;

        let bytes = std::fs::read(file_path)
            .map_err(|e| ImageError::FileSystem(format!("无法读取图片文件：{}", e)))?;

        EncodedImage::from_bytes(bytes)
    }

    /// 从 data URL 或裸 base64 文本加载。
    pub fn load_base64(&self, data: &str) -> Result<EncodedImage, ImageError> {
        log::debug!("📝 解析 base64 拍摄图片（{} 字符）", data.len());

        let payload = strip_data_url(data.trim())?;
        self.check_size(estimate_decoded_len(payload)?, "Base64 预计解码体积过大")?;

        let bytes = general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| ImageError::Decode(format!("Base64 解码失败：{}", e)))?;
        self.check_size(bytes.len() as u64, "Base64 解码后体积过大")?;

        EncodedImage::from_bytes(bytes)
    }

    fn check_size(&self, len: u64, label: &str) -> Result<(), ImageError> {
        if len > self.max_capture_bytes {
            return Err(ImageError::ResourceLimit(format!(
                "{}：{:.2} MB（限制：{:.2} MB）",
                label,
                len as f64 / 1024.0 / 1024.0,
                self.max_capture_bytes as f64 / 1024.0 / 1024.0
            )));
        }
        Ok(())
    }
}

fn is_base64_text(text: &str) -> bool {
    !text.is_empty()
        && text
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=') || b.is_ascii_whitespace())
}

fn strip_data_url(data: &str) -> Result<&str, ImageError> {
    if !data.starts_with(DATA_URL_PREFIX) {
        return Ok(data);
    }

    let start = data
        .find(BASE64_MARKER)
        .ok_or_else(|| ImageError::InvalidFormat("缺少 base64 标记".to_string()))?;
    Ok(&data[start + BASE64_MARKER.len()..])
}

fn estimate_decoded_len(base64_data: &str) -> Result<u64, ImageError> {
    let len = base64_data.len() as u64;
    let groups = len
        .checked_add(3)
        .ok_or_else(|| ImageError::ResourceLimit("Base64 输入长度溢出".to_string()))?
        / 4;

    groups
        .checked_mul(3)
        .ok_or_else(|| ImageError::ResourceLimit("Base64 解码体积估算溢出".to_string()))
}
