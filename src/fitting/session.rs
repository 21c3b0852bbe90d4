//! 会话数据模型与只读投影。

use super::classifier::CorrectiveAction;
use super::{CaptureRole, ClassifiedError, EncodedImage, ErrorKind, RetryState};

/// 试衣流程所处的步骤。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Step {
    #[default]
    Idle,
    AwaitingGarmentPhoto,
    AwaitingSubjectPhoto,
    Generating,
    Succeeded,
    Failed,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingGarmentPhoto => "awaiting-garment-photo",
            Self::AwaitingSubjectPhoto => "awaiting-subject-photo",
            Self::Generating => "generating",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// 展示层可触发的动作，以及生成完成这一内部事件。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    GarmentCaptured,
    SubjectCaptured,
    Retry,
    Restart,
    TryAnotherGarment,
}

/// 一次试衣会话。
///
/// 只由 `FittingStateMachine` 修改；进入 `Succeeded`/`Failed` 后，
/// `result_image` 与 `last_error` 有且仅有一个被设置。
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub(super) step: Step,
    pub(super) garment_image: Option<EncodedImage>,
    pub(super) subject_image: Option<EncodedImage>,
    pub(super) result_image: Option<EncodedImage>,
    pub(super) last_error: Option<ClassifiedError>,
    pub(super) recapture: Option<CaptureRole>,
}

impl Session {
    pub fn step(&self) -> Step {
        self.step
    }

    pub fn garment_image(&self) -> Option<&EncodedImage> {
        self.garment_image.as_ref()
    }

    pub fn subject_image(&self) -> Option<&EncodedImage> {
        self.subject_image.as_ref()
    }

    pub fn result_image(&self) -> Option<&EncodedImage> {
        self.result_image.as_ref()
    }

    pub fn last_error(&self) -> Option<&ClassifiedError> {
        self.last_error.as_ref()
    }

    /// 失败需要新输入时，指出应重新拍摄哪张照片。
    pub fn recapture(&self) -> Option<CaptureRole> {
        self.recapture
    }

    pub(super) fn clear_outcome(&mut self) {
        self.result_image = None;
        self.last_error = None;
        self.recapture = None;
    }
}

/// 交给展示层的只读快照。
#[derive(Debug, Clone)]
pub struct SessionView {
    pub step: Step,
    pub has_garment: bool,
    pub has_subject: bool,
    pub result_image: Option<EncodedImage>,
    pub last_error: Option<ClassifiedError>,
    pub retry: Option<RetryState>,
    pub corrective_action: Option<CorrectiveAction>,
}

impl SessionView {
    pub(super) fn project(session: &Session, retry: Option<RetryState>) -> Self {
        let corrective_action = session
            .last_error
            .as_ref()
            .map(|error| corrective_action_for(error, session.recapture, retry));

        Self {
            step: session.step,
            has_garment: session.garment_image.is_some(),
            has_subject: session.subject_image.is_some(),
            result_image: session.result_image.clone(),
            last_error: session.last_error.clone(),
            retry,
            corrective_action,
        }
    }

    pub fn countdown_secs_remaining(&self) -> u64 {
        self.retry.map(|state| state.countdown_secs_remaining()).unwrap_or(0)
    }
}

fn corrective_action_for(
    error: &ClassifiedError,
    recapture: Option<CaptureRole>,
    retry: Option<RetryState>,
) -> CorrectiveAction {
    if let Some(role) = recapture {
        return CorrectiveAction::Recapture(role);
    }

    match error.kind() {
        ErrorKind::AuthMissing | ErrorKind::AuthInvalid => CorrectiveAction::ReconfigureCredential,
        ErrorKind::ContentRejected => CorrectiveAction::Recapture(CaptureRole::Subject),
        _ if retry.map(|state| state.countdown_secs_remaining() > 0).unwrap_or(false) => {
            CorrectiveAction::WaitAndRetry
        }
        _ => CorrectiveAction::Retry,
    }
}
