//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `FittingConfig`：远端服务地址与模型、预处理参数、
//! 进度文案轮播节奏、以及各类错误的冷却时长。
//! 冷却时长在不同部署里差异很大（30s / 90s / 120s 都出现过），
//! 因此作为 `RetryPolicy` 暴露为配置，而不是写死在分类器里。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的配置（512px / JPEG 质量 60，与移动端拍照场景匹配）。
//! - `PreprocessProfile` 是面向用户的档位语义，映射到底层预处理参数组合。
//! - `validate` 在加载设置文件后做范围校验，拒绝明显错误的数值。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::FittingError;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_CREDENTIAL_ENV: &str = "GEMINI_API_KEY";

pub const DEFAULT_INSTRUCTION: &str = "Virtual try-on: dress the person shown in the second image \
in the garment shown in the first image. Preserve the garment's exact texture, color, pattern and \
details. Preserve the person's face, identity, body shape and pose. Produce a realistic fit with \
natural folds, lighting and shading consistent with the second photo. Return only the final image, \
no text.";

/// 降采样滤镜。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Bilinear,
    CatmullRom,
    Lanczos3,
}

impl ResizeFilter {
    pub(crate) fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Bilinear => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }

    pub(crate) fn to_fast_filter(self) -> fast_image_resize::FilterType {
        match self {
            Self::Nearest => fast_image_resize::FilterType::Box,
            Self::Bilinear => fast_image_resize::FilterType::Bilinear,
            Self::CatmullRom => fast_image_resize::FilterType::CatmullRom,
            Self::Lanczos3 => fast_image_resize::FilterType::Lanczos3,
        }
    }
}

/// 各错误类别的冷却时长（秒）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 配额耗尽 / 限流后的冷却。
    pub rate_limited_cooldown_secs: u64,
    /// 响应中没有图片时的冷却（通常可立即重试）。
    pub empty_response_cooldown_secs: u64,
    /// 网络/传输失败后的冷却。
    pub transient_cooldown_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limited_cooldown_secs: 30,
            empty_response_cooldown_secs: 0,
            transient_cooldown_secs: 5,
        }
    }
}

/// 试衣链路配置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FittingConfig {
    /// 生成服务的 REST 根地址。
    pub endpoint: String,
    /// 图像生成模型名称。
    pub model: String,
    /// 输出图片的固定宽高比。
    pub aspect_ratio: String,
    /// 随两张图片一起发送的合成指令。
    pub instruction: String,
    /// 读取访问凭证的环境变量名（每次生成前重新读取）。
    pub credential_env: String,
    /// 单次生成请求的总超时（秒）。
    pub request_timeout_secs: u64,
    /// 建立连接（TCP/TLS）超时（秒）。
    pub connect_timeout_secs: u64,
    /// 拍摄图片允许的最大体积（字节）。
    pub max_capture_bytes: u64,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 发送前长边的最大像素数。
    pub max_dimension_px: u32,
    /// 重新编码 JPEG 的质量（1~100）。
    pub jpeg_quality: u8,
    /// 降采样滤镜。
    pub resize_filter: ResizeFilter,
    /// 生成中进度文案的轮播间隔（毫秒），只影响观感，不影响请求超时。
    pub progress_interval_ms: u64,
    /// 轮播的进度文案。
    pub progress_messages: Vec<String>,
    /// 错误冷却策略。
    pub retry: RetryPolicy,
}

impl Default for FittingConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            aspect_ratio: "3:4".to_string(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
            max_capture_bytes: 25 * 1024 * 1024,
            max_decoded_pixels: 40_000_000,
            max_dimension_px: 512,
            jpeg_quality: 60,
            resize_filter: ResizeFilter::Bilinear,
            progress_interval_ms: 2_500,
            progress_messages: vec![
                "正在扫描版型...".to_string(),
                "正在处理面料纹理...".to_string(),
                "正在渲染高清细节...".to_string(),
                "正在完成合成...".to_string(),
            ],
            retry: RetryPolicy::default(),
        }
    }
}

/// 预处理档位（面向产品/用户语义）。
///
/// - `Quality`：尽量保真，请求体更大
/// - `Balanced`：默认档位
/// - `Speed`：优先上传速度与配额消耗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessProfile {
    Quality,
    Balanced,
    Speed,
}

impl PreprocessProfile {
    /// 从外部字符串解析档位。
    pub fn parse(profile: &str) -> Result<Self, FittingError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(FittingError::InvalidConfig(format!(
                "未知预处理档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}

impl FittingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// 应用指定档位到实际参数。
    pub fn apply_profile(&mut self, profile: PreprocessProfile) {
        match profile {
            PreprocessProfile::Quality => {
                self.max_dimension_px = 1024;
                self.jpeg_quality = 85;
                self.resize_filter = ResizeFilter::CatmullRom;
            }
            PreprocessProfile::Balanced => {
                self.max_dimension_px = 512;
                self.jpeg_quality = 60;
                self.resize_filter = ResizeFilter::Bilinear;
            }
            PreprocessProfile::Speed => {
                self.max_dimension_px = 384;
                self.jpeg_quality = 50;
                self.resize_filter = ResizeFilter::Nearest;
            }
        }
    }

    /// 基于当前参数反推档位（给展示层显示当前状态）。
    pub fn infer_profile(&self) -> PreprocessProfile {
        if self.max_dimension_px >= 1024 && self.jpeg_quality >= 80 {
            return PreprocessProfile::Quality;
        }

        if self.max_dimension_px <= 384 || self.jpeg_quality <= 50 {
            return PreprocessProfile::Speed;
        }

        PreprocessProfile::Balanced
    }

    /// 范围校验。
    pub fn validate(&self) -> Result<(), FittingError> {
        if self.endpoint.trim().is_empty() {
            return Err(FittingError::InvalidConfig("endpoint 不能为空".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(FittingError::InvalidConfig("model 不能为空".to_string()));
        }
        if self.credential_env.trim().is_empty() {
            return Err(FittingError::InvalidConfig("credential_env 不能为空".to_string()));
        }
        if !(64..=4096).contains(&self.max_dimension_px) {
            return Err(FittingError::InvalidConfig(
                "max_dimension_px 必须在 64~4096 之间".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(FittingError::InvalidConfig("jpeg_quality 必须在 1~100 之间".to_string()));
        }
        if !(1..=600).contains(&self.request_timeout_secs) {
            return Err(FittingError::InvalidConfig(
                "request_timeout_secs 必须在 1~600 秒之间".to_string(),
            ));
        }
        if !(1..=120).contains(&self.connect_timeout_secs) {
            return Err(FittingError::InvalidConfig(
                "connect_timeout_secs 必须在 1~120 秒之间".to_string(),
            ));
        }
        if self.connect_timeout_secs > self.request_timeout_secs {
            return Err(FittingError::InvalidConfig(
                "connect_timeout_secs 不能大于 request_timeout_secs".to_string(),
            ));
        }
        if !(100..=60_000).contains(&self.progress_interval_ms) {
            return Err(FittingError::InvalidConfig(
                "progress_interval_ms 必须在 100~60000 毫秒之间".to_string(),
            ));
        }
        if self.retry.rate_limited_cooldown_secs > 3_600
            || self.retry.empty_response_cooldown_secs > 3_600
            || self.retry.transient_cooldown_secs > 3_600
        {
            return Err(FittingError::InvalidConfig("冷却时长不能超过 3600 秒".to_string()));
        }

        Ok(())
    }
}
