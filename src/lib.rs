//! # 虚拟试衣编排引擎：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │         展示层 / 拍摄组件（外部协作者，CLI 仅为驱动）      │
//! │                                                          │
//! │  动作：start / capture / retry / restart / try-another   │
//! │       ↕                                                  │
//! │  FittingEvent（StepChanged / Progress / Countdown）       │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↕ mpsc 事件通道 + Result<T, AppError>
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            核心 (Rust)                           │
//! │                                                          │
//! │  ┌─ error ────── AppError (统一错误类型)                  │
//! │  │                                                       │
//! │  ├─ settings ─── FittingConfig JSON 读写                  │
//! │  │                                                       │
//! │  └─ fitting ──── 试衣编排                                 │
//! │      ├─ service        异步驱动·进度轮播·倒计时           │
//! │      ├─ machine        状态机·epoch·过期结果丢弃          │
//! │      ├─ pipeline       解码·降采样·JPEG 重编码            │
//! │      ├─ client         请求组装·响应解析                  │
//! │      ├─ classifier     错误分类                           │
//! │      └─ retry          冷却倒计时                         │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↕ HTTPS (reqwest)
//!    远端图像生成服务
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError`，入口函数的返回类型 |
//! | [`settings`] | 设置文件加载与保存，缺省时回退默认配置 |
//! | [`fitting`] | 拍摄 → 预处理 → 生成 → 结果/错误 的完整编排 |

pub mod error;
pub mod fitting;
pub mod settings;
