//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义全局统一的 `AppError` 枚举，各层错误（图片、状态机、远端分类错误、传输、I/O）
//! 都通过 `#[from]` 汇入，入口代码只需 `?`。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 实现 `Serialize` 将错误序列化为字符串，展示层拿到的就是可直接显示的文案。

use serde::Serialize;

use crate::fitting::{ClassifiedError, FittingError, ImageError, TransportError};

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 拍摄图片加载 / 预处理错误
    #[error("{0}")]
    Image(#[from] ImageError),

    /// 状态机拒绝了动作，或配置无效
    #[error("{0}")]
    Fitting(#[from] FittingError),

    /// 远端生成失败（已分类）
    #[error("{0}")]
    Generation(#[from] ClassifiedError),

    /// HTTP 客户端初始化失败
    #[error("网络初始化失败: {0}")]
    Transport(#[from] TransportError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 设置文件读写失败
    #[error("设置文件错误: {0}")]
    Settings(String),
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
