//! 倒计时门控的重试策略。
//!
//! 调度器本身不持有计时器，只定义状态如何推进；
//! 由服务层每秒投递一次 `tick`，状态机据此判断是否允许重试。

use super::ClassifiedError;

/// 重试倒计时状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryState {
    countdown_secs_remaining: u64,
}

impl RetryState {
    pub fn countdown_secs_remaining(&self) -> u64 {
        self.countdown_secs_remaining
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryScheduler;

impl RetryScheduler {
    pub fn new() -> Self {
        Self
    }

    pub fn start(&self, error: &ClassifiedError) -> RetryState {
        RetryState {
            countdown_secs_remaining: error.retryable_after_secs(),
        }
    }

    pub fn tick(&self, state: RetryState) -> RetryState {
        RetryState {
            countdown_secs_remaining: state.countdown_secs_remaining.saturating_sub(1),
        }
    }

    pub fn can_retry_now(&self, state: RetryState) -> bool {
        state.countdown_secs_remaining == 0
    }
}
