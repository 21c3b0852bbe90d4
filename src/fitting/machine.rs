//! # 试衣状态机
//!
//! ## 设计思路
//!
//! 会话状态只有一个写入方：`FittingStateMachine`。它本身是同步的，
//! 不做任何 I/O；需要发起生成时返回一张 `GenerationTicket`，由服务层去执行，
//! 执行结果再带着同一个 `RequestToken` 回到 `complete`。
//!
//! ## 实现思路
//!
//! - `epoch` 单调递增：每次发起生成、重新开始、换一件衣服都会推进。
//! - `complete`/`tick` 携带的 token 与当前 `epoch` 不一致时直接丢弃，
//!   保证重新开始之后迟到的响应或倒计时不会污染新会话。
//! - 只有 `AwaitingSubjectPhoto` 和 `Failed` 能签发 ticket，
//!   而签发后立即进入 `Generating`，因此同一时刻最多只有一个请求在途。

use super::error::FittingError;
use super::session::{Action, Session, SessionView, Step};
use super::{
    CaptureRole, ClassifiedError, EncodedImage, ErrorKind, ImageError, RetryScheduler, RetryState,
};

/// 标识一次生成尝试的纪元值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// 状态机签发的生成任务：token + 待处理的两张原图。
#[derive(Debug, Clone)]
pub struct GenerationTicket {
    pub token: RequestToken,
    pub garment: EncodedImage,
    pub subject: EncodedImage,
}

/// 一次尝试的失败原因。
#[derive(Debug, Clone)]
pub enum AttemptFailure {
    /// 预处理失败（输入本身有问题，需要重新拍摄）
    Preprocess { role: CaptureRole, error: ImageError },
    /// 远端生成失败（已分类）
    Generation(ClassifiedError),
}

/// `complete` 的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied(Step),
    Stale,
}

/// `retry` 的结果。
#[derive(Debug, Clone)]
pub enum RetryOutcome {
    /// 使用已保存的两张图重新提交
    Resubmit(GenerationTicket),
    /// 输入有问题，已回到对应的拍摄步骤
    Recapture(CaptureRole),
}

/// `tick` 的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Counting(RetryState),
    Ready(RetryState),
    Dropped,
}

#[derive(Debug, Default)]
pub struct FittingStateMachine {
    session: Session,
    scheduler: RetryScheduler,
    retry: Option<RetryState>,
    epoch: u64,
}

impl FittingStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn step(&self) -> Step {
        self.session.step
    }

    pub fn retry_state(&self) -> Option<RetryState> {
        self.retry
    }

    pub fn view(&self) -> SessionView {
        SessionView::project(&self.session, self.retry)
    }

    /// 当前纪元对应的 token。
    pub fn current_token(&self) -> RequestToken {
        RequestToken(self.epoch)
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        token.0 == self.epoch
    }

    /// 该 token 对应的请求是否仍在途。
    pub fn is_in_flight(&self, token: RequestToken) -> bool {
        self.session.step == Step::Generating && self.is_current(token)
    }

    pub fn can_retry_now(&self) -> bool {
        self.retry
            .map(|state| self.scheduler.can_retry_now(state))
            .unwrap_or(true)
    }

    pub fn start(&mut self) -> Result<Step, FittingError> {
        self.expect_step(Action::Start, &[Step::Idle])?;
        self.enter(Action::Start, Step::AwaitingGarmentPhoto);
        Ok(self.session.step)
    }

    pub fn capture_garment(&mut self, image: EncodedImage) -> Result<Step, FittingError> {
        self.expect_step(Action::GarmentCaptured, &[Step::AwaitingGarmentPhoto])?;
        self.session.garment_image = Some(image);
        self.enter(Action::GarmentCaptured, Step::AwaitingSubjectPhoto);
        Ok(self.session.step)
    }

    pub fn capture_subject(&mut self, image: EncodedImage) -> Result<GenerationTicket, FittingError> {
        self.expect_step(Action::SubjectCaptured, &[Step::AwaitingSubjectPhoto])?;
        self.session.subject_image = Some(image);
        self.issue_ticket(Action::SubjectCaptured)
    }

    /// 应用一次生成尝试的结果。
    ///
    /// token 过期（已重新开始或已发起更新的尝试）时不做任何修改。
    pub fn complete(
        &mut self,
        token: RequestToken,
        result: Result<EncodedImage, AttemptFailure>,
    ) -> Completion {
        if !self.is_in_flight(token) {
            log::debug!(
                "🗑️ 丢弃过期的生成结果 - token={} 当前 epoch={} step={:?}",
                token.0,
                self.epoch,
                self.session.step
            );
            return Completion::Stale;
        }

        match result {
            Ok(image) => {
                self.session.result_image = Some(image);
                self.session.last_error = None;
                self.session.recapture = None;
                self.retry = None;
                self.session.step = Step::Succeeded;
                log::info!("✅ 生成成功 - token={}", token.0);
            }
            Err(AttemptFailure::Preprocess { role, error }) => {
                log::warn!("⚠️ {} 照片预处理失败：{}", role.as_str(), error);
                self.session.result_image = None;
                self.session.last_error = Some(ClassifiedError::new(
                    ErrorKind::Unknown,
                    format!("无法处理这张照片，请重新拍摄（{}）", error),
                    0,
                ));
                self.session.recapture = Some(role);
                self.retry = None;
                self.session.step = Step::Failed;
            }
            Err(AttemptFailure::Generation(error)) => {
                log::warn!(
                    "⚠️ 生成失败 - kind={} cooldown={}s：{}",
                    error.kind().as_str(),
                    error.retryable_after_secs(),
                    error.human_message()
                );
                self.retry = if error.retryable_after_secs() > 0 {
                    Some(self.scheduler.start(&error))
                } else {
                    None
                };
                self.session.recapture = if error.kind() == ErrorKind::ContentRejected {
                    Some(CaptureRole::Subject)
                } else {
                    None
                };
                self.session.result_image = None;
                self.session.last_error = Some(error);
                self.session.step = Step::Failed;
            }
        }

        Completion::Applied(self.session.step)
    }

    /// 推进一秒倒计时。
    ///
    /// 只有仍停留在该 token 对应的失败页时才生效，其余情况丢弃。
    pub fn tick(&mut self, token: RequestToken) -> TickOutcome {
        if self.session.step != Step::Failed || !self.is_current(token) {
            return TickOutcome::Dropped;
        }

        let Some(state) = self.retry else {
            return TickOutcome::Dropped;
        };

        let next = self.scheduler.tick(state);
        self.retry = Some(next);

        if self.scheduler.can_retry_now(next) {
            TickOutcome::Ready(next)
        } else {
            TickOutcome::Counting(next)
        }
    }

    pub fn retry(&mut self) -> Result<RetryOutcome, FittingError> {
        self.expect_step(Action::Retry, &[Step::Failed])?;

        if let Some(role) = self.session.recapture {
            self.route_to_recapture(role);
            return Ok(RetryOutcome::Recapture(role));
        }

        if let Some(state) = self.retry {
            if !self.scheduler.can_retry_now(state) {
                log::debug!(
                    "⏳ 重试被拒绝，冷却剩余 {}s",
                    state.countdown_secs_remaining()
                );
                return Err(FittingError::RetryNotReady {
                    remaining_secs: state.countdown_secs_remaining(),
                });
            }
        }

        self.issue_ticket(Action::Retry).map(RetryOutcome::Resubmit)
    }

    /// 回到初始状态并清空会话，任何状态下都可调用。
    pub fn restart(&mut self) -> Step {
        self.epoch = self.epoch.wrapping_add(1);
        self.session = Session::default();
        self.retry = None;
        self.record(Action::Restart, Step::Idle);
        Step::Idle
    }

    /// “换一件衣服”：从结果页或失败页直接回到拍衣服这一步。
    pub fn try_another_garment(&mut self) -> Result<Step, FittingError> {
        if !self.session.step.is_terminal() {
            return Err(self.invalid(Action::TryAnotherGarment));
        }

        self.epoch = self.epoch.wrapping_add(1);
        self.session = Session::default();
        self.retry = None;
        self.enter(Action::TryAnotherGarment, Step::AwaitingGarmentPhoto);
        Ok(self.session.step)
    }

    fn route_to_recapture(&mut self, role: CaptureRole) {
        self.epoch = self.epoch.wrapping_add(1);
        self.session.clear_outcome();
        self.retry = None;

        let next = match role {
            CaptureRole::Garment => {
                self.session.garment_image = None;
                self.session.subject_image = None;
                Step::AwaitingGarmentPhoto
            }
            CaptureRole::Subject => {
                self.session.subject_image = None;
                Step::AwaitingSubjectPhoto
            }
        };
        self.enter(Action::Retry, next);
    }

    fn issue_ticket(&mut self, action: Action) -> Result<GenerationTicket, FittingError> {
        let (Some(garment), Some(subject)) = (
            self.session.garment_image.clone(),
            self.session.subject_image.clone(),
        ) else {
            return Err(self.invalid(action));
        };

        self.epoch = self.epoch.wrapping_add(1);
        self.session.clear_outcome();
        self.retry = None;
        self.enter(action, Step::Generating);

        Ok(GenerationTicket {
            token: RequestToken(self.epoch),
            garment,
            subject,
        })
    }

    fn expect_step(&self, action: Action, allowed: &[Step]) -> Result<(), FittingError> {
        if allowed.contains(&self.session.step) {
            return Ok(());
        }

        if self.session.step == Step::Generating {
            log::warn!("⚠️ 生成进行中，忽略 {:?}", action);
            return Err(FittingError::Busy);
        }

        Err(self.invalid(action))
    }

    fn invalid(&self, action: Action) -> FittingError {
        let from = self.session.step;
        log::warn!("⚠️ 非法状态跳转：{:?} 不接受 {:?}", from, action);
        FittingError::InvalidTransition { from, action }
    }

    fn enter(&mut self, action: Action, next: Step) {
        self.session.step = next;
        self.record(action, next);
    }

    fn record(&self, action: Action, next: Step) {
        log::debug!("🔀 {:?} -> {} (epoch={})", action, next.as_str(), self.epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(tag: u8) -> EncodedImage {
        EncodedImage::new(vec![tag; 4], "image/jpeg", 2, 2)
    }

    fn machine_in_generating() -> (FittingStateMachine, GenerationTicket) {
        let mut machine = FittingStateMachine::new();
        machine.start().expect("idle -> awaiting garment");
        machine.capture_garment(image(1)).expect("garment captured");
        let ticket = machine.capture_subject(image(2)).expect("subject captured");
        (machine, ticket)
    }

    fn rate_limited(secs: u64) -> AttemptFailure {
        AttemptFailure::Generation(ClassifiedError::new(ErrorKind::RateLimited, "wait", secs))
    }

    #[test]
    fn happy_path_walks_every_step() {
        let mut machine = FittingStateMachine::new();
        assert_eq!(machine.step(), Step::Idle);
        assert_eq!(machine.start().expect("start"), Step::AwaitingGarmentPhoto);
        assert_eq!(
            machine.capture_garment(image(1)).expect("garment"),
            Step::AwaitingSubjectPhoto
        );

        let ticket = machine.capture_subject(image(2)).expect("subject");
        assert_eq!(machine.step(), Step::Generating);
        assert_eq!(ticket.garment, image(1));
        assert_eq!(ticket.subject, image(2));

        let completion = machine.complete(ticket.token, Ok(image(9)));
        assert_eq!(completion, Completion::Applied(Step::Succeeded));
        assert_eq!(machine.session().result_image(), Some(&image(9)));
        assert!(machine.session().last_error().is_none());
    }

    #[test]
    fn invalid_transition_does_not_mutate_state() {
        let mut machine = FittingStateMachine::new();

        let err = machine.capture_garment(image(1)).expect_err("idle rejects capture");

        assert_eq!(
            err,
            FittingError::InvalidTransition {
                from: Step::Idle,
                action: Action::GarmentCaptured
            }
        );
        assert_eq!(machine.step(), Step::Idle);
        assert!(machine.session().garment_image().is_none());
    }

    #[test]
    fn events_while_generating_are_rejected_as_busy() {
        let (mut machine, ticket) = machine_in_generating();

        assert_eq!(machine.capture_subject(image(3)).expect_err("busy"), FittingError::Busy);
        assert_eq!(machine.capture_garment(image(3)).expect_err("busy"), FittingError::Busy);
        assert!(matches!(machine.retry(), Err(FittingError::Busy)));
        assert!(machine.is_in_flight(ticket.token));
        assert_eq!(machine.session().subject_image(), Some(&image(2)));
    }

    #[test]
    fn failure_with_cooldown_starts_countdown() {
        let (mut machine, ticket) = machine_in_generating();

        machine.complete(ticket.token, Err(rate_limited(2)));

        assert_eq!(machine.step(), Step::Failed);
        assert!(machine.session().result_image().is_none());
        assert_eq!(machine.retry_state().map(|s| s.countdown_secs_remaining()), Some(2));
        assert_eq!(
            machine.retry().expect_err("cooling down"),
            FittingError::RetryNotReady { remaining_secs: 2 }
        );

        assert!(matches!(machine.tick(ticket.token), TickOutcome::Counting(_)));
        assert!(matches!(machine.tick(ticket.token), TickOutcome::Ready(_)));

        let RetryOutcome::Resubmit(next) = machine.retry().expect("retry allowed") else {
            panic!("expected resubmit");
        };
        assert!(next.token > ticket.token);
        assert_eq!(next.garment, image(1));
        assert_eq!(next.subject, image(2));
        assert_eq!(machine.step(), Step::Generating);
        assert!(machine.retry_state().is_none());
        assert!(machine.session().last_error().is_none());
    }

    #[test]
    fn zero_cooldown_failure_is_immediately_retryable() {
        let (mut machine, ticket) = machine_in_generating();
        let error = ClassifiedError::new(ErrorKind::EmptyResponse, "empty", 0);

        machine.complete(ticket.token, Err(AttemptFailure::Generation(error)));

        assert!(machine.retry_state().is_none());
        assert!(machine.can_retry_now());
        assert!(matches!(machine.retry(), Ok(RetryOutcome::Resubmit(_))));
    }

    #[test]
    fn decode_failure_routes_retry_to_recapture() {
        let (mut machine, ticket) = machine_in_generating();

        machine.complete(
            ticket.token,
            Err(AttemptFailure::Preprocess {
                role: CaptureRole::Subject,
                error: ImageError::Decode("bad bytes".into()),
            }),
        );

        let error = machine.session().last_error().expect("error recorded");
        assert_eq!(error.kind(), ErrorKind::Unknown);
        assert_eq!(error.retryable_after_secs(), 0);
        assert_eq!(machine.session().recapture(), Some(CaptureRole::Subject));
        assert!(machine.retry_state().is_none());

        let outcome = machine.retry().expect("retry routes back");
        assert!(matches!(outcome, RetryOutcome::Recapture(CaptureRole::Subject)));
        assert_eq!(machine.step(), Step::AwaitingSubjectPhoto);
        assert!(machine.session().garment_image().is_some());
        assert!(machine.session().subject_image().is_none());
        assert!(machine.session().last_error().is_none());
    }

    #[test]
    fn garment_decode_failure_goes_back_to_first_capture() {
        let (mut machine, ticket) = machine_in_generating();

        machine.complete(
            ticket.token,
            Err(AttemptFailure::Preprocess {
                role: CaptureRole::Garment,
                error: ImageError::Decode("bad bytes".into()),
            }),
        );
        machine.retry().expect("retry routes back");

        assert_eq!(machine.step(), Step::AwaitingGarmentPhoto);
        assert!(machine.session().garment_image().is_none());
    }

    #[test]
    fn content_rejection_asks_for_new_subject_photo() {
        let (mut machine, ticket) = machine_in_generating();
        let error = ClassifiedError::new(ErrorKind::ContentRejected, "blocked", 0);

        machine.complete(ticket.token, Err(AttemptFailure::Generation(error)));

        assert!(matches!(
            machine.retry(),
            Ok(RetryOutcome::Recapture(CaptureRole::Subject))
        ));
    }

    #[test]
    fn restart_during_generation_drops_late_result() {
        let (mut machine, ticket) = machine_in_generating();

        assert_eq!(machine.restart(), Step::Idle);
        let completion = machine.complete(ticket.token, Ok(image(9)));

        assert_eq!(completion, Completion::Stale);
        assert_eq!(machine.step(), Step::Idle);
        assert!(machine.session().result_image().is_none());
        assert!(machine.session().garment_image().is_none());
    }

    #[test]
    fn ticks_after_leaving_failed_state_are_dropped() {
        let (mut machine, ticket) = machine_in_generating();
        machine.complete(ticket.token, Err(rate_limited(5)));

        machine.restart();

        assert_eq!(machine.tick(ticket.token), TickOutcome::Dropped);
        assert!(machine.retry_state().is_none());
    }

    #[test]
    fn stale_ticks_do_not_touch_new_failure() {
        let (mut machine, first) = machine_in_generating();
        machine.complete(first.token, Err(rate_limited(1)));
        machine.tick(first.token);

        let RetryOutcome::Resubmit(second) = machine.retry().expect("retry") else {
            panic!("expected resubmit");
        };
        machine.complete(second.token, Err(rate_limited(3)));

        assert_eq!(machine.tick(first.token), TickOutcome::Dropped);
        assert_eq!(machine.retry_state().map(|s| s.countdown_secs_remaining()), Some(3));
    }

    #[test]
    fn try_another_garment_clears_outcome() {
        let (mut machine, ticket) = machine_in_generating();
        machine.complete(ticket.token, Ok(image(9)));

        assert_eq!(
            machine.try_another_garment().expect("shortcut"),
            Step::AwaitingGarmentPhoto
        );
        assert!(machine.session().result_image().is_none());
        assert!(machine.session().garment_image().is_none());
        assert!(machine.retry_state().is_none());
    }

    #[test]
    fn try_another_garment_requires_terminal_step() {
        let mut machine = FittingStateMachine::new();
        machine.start().expect("start");

        assert!(matches!(
            machine.try_another_garment(),
            Err(FittingError::InvalidTransition { .. })
        ));
    }
}
