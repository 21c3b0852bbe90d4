//! # 生成客户端模块
//!
//! ## 设计思路
//!
//! 把“两张图 + 指令”变成一次远端调用，再把响应变成结果图或分类后的错误。
//! 客户端不重试、不等待，失败一律交给 [`ErrorClassifier`] 归类后原样返回。
//!
//! ## 实现思路
//!
//! 1. 凭证为空：直接返回 `AuthMissing`，不发请求
//! 2. 组装请求体，经 [`Transport`] 发送一次
//! 3. 非 2xx：解析错误信封，连同 `Retry-After` 一起交给分类器
//! 4. 2xx：先检查安全拦截，再展开全部 part，取第一张图片
//! 5. 对结果图做 base64 解码与尺寸探测

use std::time::Instant;

use base64::{Engine as _, engine::general_purpose};

use super::classifier::{RawFailure, ResponseShape};
use super::protocol::{ErrorEnvelope, GenerateRequest, GenerateResponse, ResponsePart, first_image};
use super::source::probe_dimensions;
use super::transport::{Transport, TransportRequest, TransportResponse};
use super::{ClassifiedError, EncodedImage, ErrorClassifier, FittingConfig};

const ERROR_BODY_PREVIEW_CHARS: usize = 200;

pub struct GenerationClient<T> {
    transport: T,
    classifier: ErrorClassifier,
    url: String,
    instruction: String,
    aspect_ratio: String,
}

impl<T: Transport> GenerationClient<T> {
    pub fn new(transport: T, config: &FittingConfig) -> Self {
        Self {
            transport,
            classifier: ErrorClassifier::new(config.retry.clone()),
            url: generate_url(&config.endpoint, &config.model),
            instruction: config.instruction.clone(),
            aspect_ratio: config.aspect_ratio.clone(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 发起一次试衣生成。
    pub async fn generate(
        &self,
        garment: &EncodedImage,
        subject: &EncodedImage,
        credential: Option<&str>,
    ) -> Result<EncodedImage, ClassifiedError> {
        let Some(api_key) = credential.map(str::trim).filter(|key| !key.is_empty()) else {
            log::warn!("🔑 未配置访问凭证，跳过远端调用");
            return Err(self.classifier.classify(&RawFailure::missing_credential()));
        };

        let request = GenerateRequest::fitting(garment, subject, &self.instruction, &self.aspect_ratio);
        let body = serde_json::to_vec(&request)
            .map_err(|e| self.classifier.classify(&RawFailure::other(format!("请求序列化失败：{}", e))))?;

        let start = Instant::now();
        let response = self
            .transport
            .send(TransportRequest {
                url: self.url.clone(),
                api_key: api_key.to_string(),
                body,
            })
            .await
            .map_err(|e| {
                log::warn!("⚠️ 生成请求传输失败：{}", e);
                self.classifier.classify(&RawFailure::transport(e.kind, e.message))
            })?;

        log::info!(
            "🎨 生成服务返回 HTTP {}（{}ms）",
            response.status,
            start.elapsed().as_millis()
        );

        if !response.is_success() {
            return Err(self.classifier.classify(&http_failure(&response)));
        }

        self.parse_success(&response)
            .map_err(|raw| self.classifier.classify(&raw))
    }

    fn parse_success(&self, response: &TransportResponse) -> Result<EncodedImage, RawFailure> {
        let parsed: GenerateResponse = serde_json::from_slice(&response.body)
            .map_err(|e| RawFailure::other(format!("响应解析失败：{}", e)))?;

        if let Some(reason) = parsed.safety_block_reason() {
            log::warn!("🛡️ 生成请求被安全策略拦截：{}", reason);
            return Err(RawFailure::safety(reason));
        }

        let parts = parsed.response_parts();
        if parts.is_empty() {
            return Err(RawFailure::shape(ResponseShape::NoUsableParts, "响应中没有可用的候选结果"));
        }

        let Some((mime_type, data)) = first_image(&parts) else {
            let text = parts
                .iter()
                .filter_map(|part| match part {
                    ResponsePart::Text(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" ");
            log::warn!("⚠️ 响应中没有图片 part（{} 个 part）", parts.len());
            return Err(RawFailure::shape(ResponseShape::NoImagePart, preview(&text)));
        };

        let bytes = general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| RawFailure::other(format!("结果图片 base64 解码失败：{}", e)))?;
        let (width, height) =
            probe_dimensions(&bytes).map_err(|e| RawFailure::other(format!("结果图片无法解析：{}", e)))?;

        Ok(EncodedImage::new(bytes, mime_type, width, height))
    }
}

fn generate_url(endpoint: &str, model: &str) -> String {
    format!("{}/models/{}:generateContent", endpoint.trim_end_matches('/'), model)
}

fn http_failure(response: &TransportResponse) -> RawFailure {
    match ErrorEnvelope::parse(&response.body) {
        Some(error) => RawFailure::http(
            response.status,
            error.status,
            error.message.unwrap_or_default(),
            response.retry_after_secs,
        ),
        None => RawFailure::http(
            response.status,
            None,
            preview(&String::from_utf8_lossy(&response.body)),
            response.retry_after_secs,
        ),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(ERROR_BODY_PREVIEW_CHARS).collect()
}
