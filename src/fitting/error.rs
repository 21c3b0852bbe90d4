//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 试衣链路里有两类“本地”错误：
//! - `ImageError`：拍摄图片在加载/预处理阶段出的问题（解码失败、格式不对、体积超限）。
//!   这类错误源于输入本身，不走重试倒计时，只能引导用户重新拍摄。
//! - `FittingError`：状态机拒绝了某个动作（非法跳转、生成中重复提交、倒计时未结束）。
//!
//! 远端生成服务的失败不在这里，它们统一归类为 [`ClassifiedError`](super::ClassifiedError)。

use super::session::{Action, Step};

/// 图片加载与预处理阶段的统一错误类型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("解码错误：{0}")]
    Decode(String),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("编码错误：{0}")]
    Encode(String),

    #[error("文件错误：{0}")]
    FileSystem(String),
}

impl ImageError {
    /// 稳定错误码，供展示层做分支判断。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "E_DECODE",
            Self::InvalidFormat(_) => "E_INVALID_FORMAT",
            Self::ResourceLimit(_) => "E_RESOURCE_LIMIT",
            Self::Encode(_) => "E_ENCODE",
            Self::FileSystem(_) => "E_FILE_SYSTEM",
        }
    }
}

/// 状态机与配置层错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FittingError {
    #[error("非法状态跳转：{from:?} 不接受 {action:?}")]
    InvalidTransition { from: Step, action: Action },

    #[error("已有生成请求在处理中，请稍候")]
    Busy,

    #[error("重试冷却中，还需等待 {remaining_secs} 秒")]
    RetryNotReady { remaining_secs: u64 },

    #[error("配置无效：{0}")]
    InvalidConfig(String),

    #[error("会话状态锁已中毒")]
    LockPoisoned,
}
