//! 链路中的图片数据模型。

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use image::ImageDecoder;
use image::metadata::Orientation;

use super::ImageError;

/// 拍摄的是哪一张照片。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureRole {
    /// 衣服照片
    Garment,
    /// 人物照片
    Subject,
}

impl CaptureRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Garment => "garment",
            Self::Subject => "subject",
        }
    }
}

/// 已编码图片：字节 + MIME + 像素尺寸。
///
/// 字节使用 `Bytes` 持有，克隆只增加引用计数；
/// 预处理总是产出新的实例，不会原地修改。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    bytes: Bytes,
    mime_type: String,
    width: u32,
    height: u32,
}

impl EncodedImage {
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            width,
            height,
        }
    }

    /// 从原始字节构建：MIME 由文件签名识别，尺寸只读取头信息。
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, ImageError> {
        let bytes = bytes.into();
        let mime_type = sniff_image_mime(&bytes)?;
        let (width, height) = probe_dimensions(&bytes)?;

        Ok(Self {
            bytes,
            mime_type: mime_type.to_string(),
            width,
            height,
        })
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn longer_side(&self) -> u32 {
        self.width.max(self.height)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    /// 输出 `data:` URL，便于展示层直接渲染。
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// 按 MIME 推断文件扩展名。
    pub fn file_extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "bin",
        }
    }
}

/// 通过文件签名（magic bytes）识别图片 MIME。
pub(crate) fn sniff_image_mime(bytes: &[u8]) -> Result<&'static str, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::InvalidFormat("图片内容为空".to_string()));
    }

    let kind = infer::get(bytes)
        .ok_or_else(|| ImageError::InvalidFormat("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(ImageError::InvalidFormat(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(kind.mime_type())
}

/// 仅通过图片头信息读取宽高，不做完整解码。
///
/// 返回的是按 EXIF 方向摆正后的宽高，与预处理输出保持一致。
pub(crate) fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::InvalidFormat(format!("无法识别图片格式：{}", e)))?;

    let mut decoder = reader
        .into_decoder()
        .map_err(|e| ImageError::Decode(format!("无法读取图片尺寸：{}", e)))?;
    let (width, height) = decoder.dimensions();
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

    Ok(if swaps_axes(orientation) {
        (height, width)
    } else {
        (width, height)
    })
}

/// 该方向是否需要交换宽高（含 90°/270° 旋转）。
pub(crate) fn swaps_axes(orientation: Orientation) -> bool {
    matches!(
        orientation,
        Orientation::Rotate90
            | Orientation::Rotate270
            | Orientation::Rotate90FlipH
            | Orientation::Rotate270FlipH
    )
}
