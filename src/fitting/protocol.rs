//! # 生成服务报文模块
//!
//! ## 设计思路
//!
//! 远端是 `generateContent` 风格的多模态接口：请求体里按顺序放两张内联图片和一段文字指令，
//! 响应里是若干候选结果，每个候选由若干 part 组成，图片以 base64 内联返回。
//!
//! 报文结构只在本模块出现；上层拿到的是已经归一化的 [`ResponsePart`] 列表。
//!
//! ## 实现思路
//!
//! - 请求/响应都用 serde 结构体描述，字段名 camelCase。
//! - 响应中所有字段都按可选处理，缺字段不算解析失败，由客户端按“空响应”分类。
//! - 错误响应统一是 `{ "error": { code, message, status } }` 信封。

use serde::{Deserialize, Serialize};

use super::EncodedImage;

/// 被视为安全拦截的结束原因。
pub const SAFETY_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "IMAGE_PROHIBITED_CONTENT",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

impl GenerateRequest {
    /// 组装试衣请求：衣服图在前，人物图在后，最后是文字指令。
    pub fn fitting(
        garment: &EncodedImage,
        subject: &EncodedImage,
        instruction: &str,
        aspect_ratio: &str,
    ) -> Self {
        Self {
            contents: vec![Content {
                role: None,
                parts: vec![
                    Part::inline_image(garment),
                    Part::inline_image(subject),
                    Part::text(instruction),
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE".to_string()],
                image_config: Some(ImageConfig {
                    aspect_ratio: aspect_ratio.to_string(),
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ImageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn inline_image(image: &EncodedImage) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: image.mime_type().to_string(),
                data: image.to_base64(),
            }),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GenerateResponse {
    /// 若响应被安全策略拦截，返回拦截原因。
    pub fn safety_block_reason(&self) -> Option<String> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            return Some(reason.to_string());
        }

        self.candidates
            .iter()
            .filter_map(|candidate| candidate.finish_reason.as_deref())
            .find(|reason| SAFETY_FINISH_REASONS.contains(reason))
            .map(str::to_string)
    }

    /// 所有候选的 part 依次展开，转换为归一化形式。
    pub fn response_parts(&self) -> Vec<ResponsePart> {
        self.candidates
            .iter()
            .filter_map(|candidate| candidate.content.as_ref())
            .flat_map(|content| content.parts.iter())
            .map(ResponsePart::from)
            .collect()
    }
}

/// 归一化后的响应 part。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    Image { mime_type: String, data: String },
    Text(String),
    Other,
}

impl From<&Part> for ResponsePart {
    fn from(part: &Part) -> Self {
        if let Some(inline) = &part.inline_data {
            if inline.mime_type.starts_with("image/") && !inline.data.is_empty() {
                return Self::Image {
                    mime_type: inline.mime_type.clone(),
                    data: inline.data.clone(),
                };
            }
        }

        match &part.text {
            Some(text) => Self::Text(text.clone()),
            None => Self::Other,
        }
    }
}

/// 第一张图片 part 的 `(mime, base64)`。
pub fn first_image(parts: &[ResponsePart]) -> Option<(&str, &str)> {
    parts.iter().find_map(|part| match part {
        ResponsePart::Image { mime_type, data } => Some((mime_type.as_str(), data.as_str())),
        _ => None,
    })
}

/// 错误信封。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl ErrorEnvelope {
    /// 解析错误响应体；不是 JSON 信封时返回 `None`。
    pub fn parse(body: &[u8]) -> Option<ErrorBody> {
        serde_json::from_slice::<ErrorEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.error)
    }
}
