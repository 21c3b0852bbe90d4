//! # 传输层模块
//!
//! ## 设计思路
//!
//! 生成客户端只依赖 [`Transport`] 这一个接缝：给定 URL、凭证和 JSON 请求体，
//! 返回状态码、`Retry-After` 提示和响应体。生产环境用 reqwest 实现，
//! 测试里换成脚本化的假实现即可覆盖全部分支。
//!
//! ## 实现思路
//!
//! - 单次请求，不在传输层做重试；重试节奏完全交给倒计时调度器。
//! - 凭证只放在请求头里，任何日志都不输出它。
//! - reqwest 错误按超时 / 连接失败 / 其它 I/O 三类映射，供分类器使用。

use std::future::Future;
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::classifier::TransportFailure;
use super::FittingConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// 一次生成请求。
#[derive(Clone)]
pub struct TransportRequest {
    pub url: String,
    pub api_key: String,
    pub body: Vec<u8>,
}

impl std::fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRequest")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// 远端的原始响应。
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub retry_after_secs: Option<u64>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportFailure,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// 生成请求的传输接缝。
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

/// 基于 reqwest 的 HTTPS 传输。
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &FittingConfig) -> Result<Self, TransportError> {
        Ok(Self {
            client: Self::build_base_http_client(config.request_timeout(), config.connect_timeout())?,
        })
    }

    /// 使用调用方构建好的 reqwest 客户端。
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_base_http_client(
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<reqwest::Client, TransportError> {
        reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::new(TransportFailure::Io, format!("无法创建 HTTP 客户端：{}", e)))
    }

    fn retry_after_hint_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
        let value = headers.get(reqwest::header::RETRY_AFTER)?;
        let text = value.to_str().ok()?.trim();
        text.parse::<u64>().ok()
    }

    fn map_reqwest_error(err: reqwest::Error) -> TransportError {
        let kind = if err.is_timeout() {
            TransportFailure::Timeout
        } else if err.is_connect() {
            TransportFailure::Connect
        } else {
            TransportFailure::Io
        };

        let message = match kind {
            TransportFailure::Timeout => format!("请求超时：{}", err.without_url()),
            TransportFailure::Connect => format!("无法连接生成服务：{}", err.without_url()),
            TransportFailure::Io => format!("网络错误：{}", err.without_url()),
        };

        TransportError::new(kind, message)
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let start = Instant::now();
        log::debug!("🌐 发送生成请求 - {}（{}KB）", request.url, request.body.len() / 1024);

        let response = self
            .client
            .post(&request.url)
            .header(API_KEY_HEADER, request.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.body)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;

        let status = response.status().as_u16();
        let retry_after_secs = Self::retry_after_hint_secs(response.headers());
        let body = response.bytes().await.map_err(Self::map_reqwest_error)?;

        log::debug!(
            "📨 收到响应 - HTTP {}（{}KB，{}ms）",
            status,
            body.len() / 1024,
            start.elapsed().as_millis()
        );

        Ok(TransportResponse {
            status,
            retry_after_secs,
            body,
        })
    }
}
