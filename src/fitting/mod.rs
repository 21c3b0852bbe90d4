//! # 试衣编排模块（fitting）
//!
//! ## 设计思路
//!
//! 把“拍衣服 → 拍人物 → 预处理 → 远端生成 → 结果/错误展示”
//! 按职责拆分为多个子模块，状态只有一个写入方（状态机），其余组件都是无状态或纯函数。
//!
//! - `service`：异步驱动，进度轮播 + 重试倒计时 + 事件推送
//! - `machine` / `session`：状态机与会话数据
//! - `pipeline`：解码、像素限制、降采样、JPEG 重编码
//! - `client` / `protocol` / `transport`：远端请求组装、报文、传输接缝
//! - `classifier` / `retry`：错误分类与冷却倒计时
//! - `loader` / `credential`：拍摄输入加载、访问凭证来源
//! - `config/error/source`：配置、错误、图片数据模型
//!
//! ## 新同事快速上手
//!
//! ```text
//! 展示层动作（start / capture / retry / restart）
//!    ↓
//! service.rs（加锁 → 状态机跳转 → 释放锁）
//!    ↓
//! machine.rs（签发 GenerationTicket + RequestToken）
//!    ↓
//! service.rs（select! 同时等待流水线与进度定时器）
//!    ├─ pipeline.rs（spawn_blocking 预处理两张图）
//!    ├─ credential.rs（每次重新读取凭证）
//!    └─ client.rs → transport.rs（单次远端调用）
//!          └─ classifier.rs（失败归类）
//!    ↓
//! machine.rs（complete(token)：过期结果直接丢弃）
//!    ↓
//! retry.rs（失败且需冷却时，每秒 tick 一次）
//! ```

mod classifier;
mod client;
mod config;
mod credential;
mod error;
mod loader;
mod machine;
mod pipeline;
mod protocol;
mod retry;
mod service;
mod session;
mod source;
mod transport;

pub use classifier::{
    ClassifiedError, CorrectiveAction, ErrorClassifier, ErrorKind, RawFailure, ResponseShape,
    TransportFailure,
};
pub use client::GenerationClient;
pub use config::{FittingConfig, PreprocessProfile, ResizeFilter, RetryPolicy};
pub use credential::{CredentialSource, EnvCredential, StaticCredential};
pub use error::{FittingError, ImageError};
pub use loader::CaptureLoader;
pub use machine::{
    AttemptFailure, Completion, FittingStateMachine, GenerationTicket, RequestToken, RetryOutcome,
    TickOutcome,
};
pub use pipeline::{ImagePreprocessor, scaled_dimensions};
pub use protocol::{ErrorBody, ErrorEnvelope, GenerateRequest, GenerateResponse, ResponsePart};
pub use retry::{RetryScheduler, RetryState};
pub use service::{AttemptOutcome, FittingEvent, FittingService};
pub use session::{Action, Session, SessionView, Step};
pub use source::{CaptureRole, EncodedImage};
pub use transport::{HttpTransport, Transport, TransportError, TransportRequest, TransportResponse};
