//! # 错误分类模块
//!
//! ## 设计思路
//!
//! 远端失败的信号五花八门：HTTP 状态码、服务端状态字符串、安全拦截标记、
//! 空响应、传输层异常……展示层与状态机只关心“是什么类别、要等多久、怎么提示”。
//! `ErrorClassifier` 把原始信号（`RawFailure`）映射到封闭的 `ErrorKind` 集合。
//!
//! ## 实现思路
//!
//! 按固定优先级逐条匹配，先命中者胜出：
//! 安全拦截 → 缺少凭证 → 凭证无效 → 限流 → 无图片 → 传输失败 → 未知。
//! 分类器是纯函数，不做任何 I/O，同样的输入永远得到同样的结果。

use once_cell::sync::Lazy;
use regex::Regex;

use super::RetryPolicy;

static API_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)api[\s_-]?key").expect("static regex must compile"));

static QUOTA_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(resource[\s_]exhausted|quota|rate[\s_-]?limit|too many requests)")
        .expect("static regex must compile")
});

/// 封闭的错误类别集合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthMissing,
    AuthInvalid,
    RateLimited,
    ContentRejected,
    EmptyResponse,
    Transient,
    Unknown,
}

/// 失败后引导用户采取的动作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectiveAction {
    /// 等待倒计时结束后重试
    WaitAndRetry,
    /// 可立即重试
    Retry,
    /// 需要重新配置访问凭证
    ReconfigureCredential,
    /// 需要重新拍摄对应照片
    Recapture(super::CaptureRole),
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthMissing => "auth_missing",
            Self::AuthInvalid => "auth_invalid",
            Self::RateLimited => "rate_limited",
            Self::ContentRejected => "content_rejected",
            Self::EmptyResponse => "empty_response",
            Self::Transient => "transient",
            Self::Unknown => "unknown",
        }
    }

    /// 该类别是否需要用户动作（而不是单纯等待）才能恢复。
    pub fn needs_user_action(self) -> bool {
        matches!(self, Self::AuthMissing | Self::AuthInvalid | Self::ContentRejected)
    }
}

/// 归一化后的失败记录，构造后不可变。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{human_message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    human_message: String,
    retryable_after_secs: u64,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, human_message: impl Into<String>, retryable_after_secs: u64) -> Self {
        Self {
            kind,
            human_message: human_message.into(),
            retryable_after_secs,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn human_message(&self) -> &str {
        &self.human_message
    }

    pub fn retryable_after_secs(&self) -> u64 {
        self.retryable_after_secs
    }
}

/// 响应结构层面的异常。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// 没有候选结果或候选里没有任何 part（通常是被限流后的空壳响应）
    NoUsableParts,
    /// 有 part，但没有任何图片 part
    NoImagePart,
}

/// 传输层失败类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    Connect,
    Io,
}

/// 分类器输入：一次失败中观察到的所有原始信号。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFailure {
    pub safety_rejected: bool,
    pub credential_missing: bool,
    pub http_status: Option<u16>,
    pub service_status: Option<String>,
    pub retry_after_secs: Option<u64>,
    pub shape: Option<ResponseShape>,
    pub transport: Option<TransportFailure>,
    pub message: String,
}

impl RawFailure {
    pub fn missing_credential() -> Self {
        Self {
            credential_missing: true,
            ..Self::default()
        }
    }

    pub fn safety(reason: impl Into<String>) -> Self {
        Self {
            safety_rejected: true,
            message: reason.into(),
            ..Self::default()
        }
    }

    pub fn http(
        status: u16,
        service_status: Option<String>,
        message: impl Into<String>,
        retry_after_secs: Option<u64>,
    ) -> Self {
        Self {
            http_status: Some(status),
            service_status,
            retry_after_secs,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn shape(shape: ResponseShape, message: impl Into<String>) -> Self {
        Self {
            shape: Some(shape),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn transport(failure: TransportFailure, message: impl Into<String>) -> Self {
        Self {
            transport: Some(failure),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    fn service_status_is(&self, expected: &str) -> bool {
        self.service_status
            .as_deref()
            .map(|status| status.eq_ignore_ascii_case(expected))
            .unwrap_or(false)
    }

    /// 服务端的 `Retry-After` 只会延长冷却，不会缩短。
    fn cooldown_at_least(&self, policy_secs: u64) -> u64 {
        self.retry_after_secs
            .map_or(policy_secs, |hint| hint.max(policy_secs))
    }

    fn signals_auth_rejection(&self) -> bool {
        if matches!(self.http_status, Some(401) | Some(403))
            || self.service_status_is("UNAUTHENTICATED")
            || self.service_status_is("PERMISSION_DENIED")
        {
            return true;
        }

        let bad_argument = self.http_status == Some(400) || self.service_status_is("INVALID_ARGUMENT");
        bad_argument && API_KEY_PATTERN.is_match(&self.message)
    }

    fn signals_quota(&self) -> bool {
        self.http_status == Some(429)
            || self.service_status_is("RESOURCE_EXHAUSTED")
            || self.shape == Some(ResponseShape::NoUsableParts)
            || (self.http_status.is_some() && QUOTA_PATTERN.is_match(&self.message))
    }

    fn signals_transport(&self) -> bool {
        self.transport.is_some()
            || matches!(self.http_status, Some(408) | Some(500..=599))
            || self.service_status_is("UNAVAILABLE")
            || self.service_status_is("DEADLINE_EXCEEDED")
    }
}

/// 错误分类器（纯函数，持有冷却策略）。
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    policy: RetryPolicy,
}

impl ErrorClassifier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn classify(&self, raw: &RawFailure) -> ClassifiedError {
        if raw.safety_rejected {
            return ClassifiedError::new(
                ErrorKind::ContentRejected,
                "照片被安全过滤器拒绝，请换一个姿势或光线重新拍摄",
                0,
            );
        }

        if raw.credential_missing {
            return ClassifiedError::new(
                ErrorKind::AuthMissing,
                "尚未配置访问凭证，请先设置 API Key",
                0,
            );
        }

        if raw.signals_auth_rejection() {
            return ClassifiedError::new(
                ErrorKind::AuthInvalid,
                "访问凭证无效或无权限，请重新配置 API Key",
                0,
            );
        }

        if raw.signals_quota() {
            return ClassifiedError::new(
                ErrorKind::RateLimited,
                "调用额度已用尽，请等待倒计时结束后重试",
                raw.cooldown_at_least(self.policy.rate_limited_cooldown_secs),
            );
        }

        if raw.shape == Some(ResponseShape::NoImagePart) {
            return ClassifiedError::new(
                ErrorKind::EmptyResponse,
                "生成服务没有返回图片，请重试",
                self.policy.empty_response_cooldown_secs,
            );
        }

        if raw.signals_transport() {
            return ClassifiedError::new(
                ErrorKind::Transient,
                "网络连接不稳定，请稍后重试",
                raw.cooldown_at_least(self.policy.transient_cooldown_secs),
            );
        }

        let detail = if raw.message.trim().is_empty() {
            "未知错误".to_string()
        } else {
            raw.message.clone()
        };
        ClassifiedError::new(ErrorKind::Unknown, format!("生成失败：{}", detail), 0)
    }
}
