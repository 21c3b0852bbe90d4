//! # 预处理流水线模块
//!
//! ## 设计思路
//!
//! 拍摄的原图往往是 3000px 以上的照片，直接上传既慢又容易触碰服务端请求体上限。
//! 发送前统一做“解码 → 按长边等比缩放 → JPEG 重新编码”，把载荷控制在可预期的范围。
//!
//! ## 实现思路
//!
//! 1. 读取 header 尺寸，按像素上限快速拒绝
//! 2. 完整解码，并按 EXIF 方向摆正（手机照片常带 Orientation 标记，重新编码后标记会丢失）
//! 3. 长边超过上限时等比缩放（短边四舍五入，至少 1px）
//! 4. 以固定质量编码为 JPEG，返回全新的 `EncodedImage`
//!
//! 解码失败属于输入问题，直接返回 `ImageError::Decode`，由状态机引导重新拍摄。

use std::io::Cursor;
use std::time::Instant;

use fast_image_resize as fr;
use image::codecs::jpeg::JpegEncoder;
use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageDecoder, ImageReader, Rgb};

use super::config::ResizeFilter;
use super::source::probe_dimensions;
use super::{EncodedImage, FittingConfig, ImageError};

/// 图片预处理器。
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    jpeg_quality: u8,
    max_decoded_pixels: u64,
    filter: ResizeFilter,
}

impl ImagePreprocessor {
    pub fn new(jpeg_quality: u8, max_decoded_pixels: u64, filter: ResizeFilter) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
            max_decoded_pixels,
            filter,
        }
    }

    pub fn from_config(config: &FittingConfig) -> Self {
        Self::new(config.jpeg_quality, config.max_decoded_pixels, config.resize_filter)
    }

    /// 缩放并重新编码一张图片。
    ///
    /// 输入保持不变，返回值是独立持有的新图片。
    pub fn preprocess(
        &self,
        image: &EncodedImage,
        max_dimension_px: u32,
    ) -> Result<EncodedImage, ImageError> {
        if max_dimension_px == 0 {
            return Err(ImageError::InvalidFormat("max_dimension_px 必须大于 0".to_string()));
        }

        let start = Instant::now();

        let (header_width, header_height) = probe_dimensions(image.bytes())?;
        self.validate_pixel_limits(header_width, header_height)?;

        let decoded = decode_upright(image.bytes())?;

        let (raw_width, raw_height) = decoded.dimensions();
        if raw_width == 0 || raw_height == 0 {
            return Err(ImageError::Decode("图片面积为 0".to_string()));
        }
        self.validate_pixel_limits(raw_width, raw_height)?;

        let (target_width, target_height) = scaled_dimensions(raw_width, raw_height, max_dimension_px);
        let rgb = decoded.to_rgb8();
        let resized = if (target_width, target_height) == (raw_width, raw_height) {
            rgb
        } else {
            self.resize(rgb, target_width, target_height)
        };

        let bytes = self.encode_jpeg(resized)?;

        log::info!(
            "🧩 预处理完成：{}x{} -> {}x{}（{}KB -> {}KB，quality={}，{}ms）",
            raw_width,
            raw_height,
            target_width,
            target_height,
            image.len() / 1024,
            bytes.len() / 1024,
            self.jpeg_quality,
            start.elapsed().as_millis()
        );

        Ok(EncodedImage::new(bytes, "image/jpeg", target_width, target_height))
    }

    /// 校验像素数量是否超过配置上限。
    fn validate_pixel_limits(&self, width: u32, height: u32) -> Result<(), ImageError> {
        let pixels = (width as u64)
            .checked_mul(height as u64)
            .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

        if pixels > self.max_decoded_pixels {
            return Err(ImageError::ResourceLimit(format!(
                "图片像素过大：{} 像素（限制：{} 像素）",
                pixels, self.max_decoded_pixels
            )));
        }

        Ok(())
    }

    fn resize(
        &self,
        rgb: ImageBuffer<Rgb<u8>, Vec<u8>>,
        target_width: u32,
        target_height: u32,
    ) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
        match Self::resize_with_fast_image_resize(&rgb, target_width, target_height, self.filter) {
            Ok(resized) => resized,
            Err(err) => {
                log::warn!("⚠️ fast_image_resize 降采样失败，回退 image::resize：{}", err);
                image::imageops::resize(
                    &rgb,
                    target_width,
                    target_height,
                    self.filter.to_image_filter(),
                )
            }
        }
    }

    fn resize_with_fast_image_resize(
        src: &ImageBuffer<Rgb<u8>, Vec<u8>>,
        target_width: u32,
        target_height: u32,
        filter: ResizeFilter,
    ) -> Result<ImageBuffer<Rgb<u8>, Vec<u8>>, ImageError> {
        let (src_width, src_height) = src.dimensions();

        let src_image = fr::images::Image::from_vec_u8(
            src_width,
            src_height,
            src.as_raw().clone(),
            fr::PixelType::U8x3,
        )
        .map_err(|e| ImageError::Decode(format!("构建源图像缓冲失败：{}", e)))?;

        let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x3);

        let mut resizer = fr::Resizer::new();
        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(filter.to_fast_filter()));

        resizer
            .resize(&src_image, &mut dst_image, Some(&options))
            .map_err(|e| ImageError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(target_width, target_height, dst_image.into_vec())
            .ok_or_else(|| ImageError::Decode("fast_image_resize 输出缓冲长度异常".to_string()))
    }

    fn encode_jpeg(&self, rgb: ImageBuffer<Rgb<u8>, Vec<u8>>) -> Result<Vec<u8>, ImageError> {
        let mut cursor = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut cursor, self.jpeg_quality);

        DynamicImage::ImageRgb8(rgb)
            .write_with_encoder(encoder)
            .map_err(|e| ImageError::Encode(format!("JPEG 编码失败：{}", e)))?;

        Ok(cursor.into_inner())
    }
}

/// 完整解码并应用 EXIF 方向。
fn decode_upright(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    let decode_err = |e: image::ImageError| ImageError::Decode(format!("图片解码失败：{}", e));

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::InvalidFormat(format!("无法识别图片格式：{}", e)))?
        .into_decoder()
        .map_err(decode_err)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

    let mut decoded = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    if orientation != Orientation::NoTransforms {
        log::debug!("🔄 按 EXIF 方向摆正：{:?}", orientation);
        decoded.apply_orientation(orientation);
    }
    Ok(decoded)
}

/// 计算缩放后的尺寸：长边不超过 `max_dimension_px`，短边四舍五入且至少为 1。
pub fn scaled_dimensions(width: u32, height: u32, max_dimension_px: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= max_dimension_px || max_dimension_px == 0 {
        return (width, height);
    }

    let scale_shorter = |shorter: u32| -> u32 {
        let scaled = (shorter as u64 * max_dimension_px as u64 + longer as u64 / 2) / longer as u64;
        (scaled as u32).clamp(1, max_dimension_px)
    };

    if width >= height {
        (max_dimension_px, scale_shorter(height))
    } else {
        (scale_shorter(width), max_dimension_px)
    }
}
