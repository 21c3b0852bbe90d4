//! # 服务层（异步驱动）
//!
//! ## 设计思路
//!
//! `FittingStateMachine` 是同步的纯状态，`FittingService` 负责把它接到真实世界：
//! 执行预处理与远端调用、驱动进度文案轮播与重试倒计时、向展示层推送事件。
//!
//! ## 实现思路
//!
//! - 状态机放在 `Arc<Mutex<_>>` 中，锁只在同步代码块里持有，绝不跨 `.await`。
//! - 每次尝试在 `tokio::select!` 里同时等待流水线与进度定时器；
//!   流水线结束即退出循环，进度只在该 token 仍在途时推送。
//! - 失败且需要冷却时派生倒计时任务，每秒投递一次 `tick(token)`，
//!   token 过期后任务自行结束。
//! - 预处理是 CPU 密集操作，放到 `spawn_blocking` 线程池执行。
//! - 事件通过无界 mpsc 通道推送，接收端关闭不影响流程本身。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::machine::{
    AttemptFailure, Completion, FittingStateMachine, GenerationTicket, RequestToken, RetryOutcome,
    TickOutcome,
};
use super::transport::Transport;
use super::{
    CaptureRole, ClassifiedError, CredentialSource, EncodedImage, FittingConfig, FittingError,
    GenerationClient, ImageError, ImagePreprocessor, RetryState, SessionView,
};

const INITIAL_PROGRESS_MESSAGE: &str = "正在启动...";
const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

/// 推送给展示层的事件。
#[derive(Debug, Clone)]
pub enum FittingEvent {
    /// 会话步骤或内容发生变化
    StepChanged(SessionView),
    /// 生成中的进度文案
    Progress { message: String },
    /// 重试倒计时推进
    Countdown(RetryState),
}

/// 一次动作的最终结果。
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Succeeded(EncodedImage),
    Failed(ClassifiedError),
    /// 需要重新拍摄对应照片，没有发起请求
    Recapture(CaptureRole),
    /// 结果返回前会话已被重新开始，结果已丢弃
    Superseded,
}

/// 试衣服务。
///
/// 克隆只复制内部 `Arc`，所有克隆共享同一个会话。
///
/// # 示例
/// ```rust,no_run
/// use fitting_room::fitting::{EncodedImage, EnvCredential, FittingConfig, FittingService, HttpTransport};
///
/// # async fn demo(garment: EncodedImage, subject: EncodedImage) -> Result<(), fitting_room::error::AppError> {
/// let config = FittingConfig::default();
/// let transport = HttpTransport::new(&config)?;
/// let credentials = EnvCredential::new(config.credential_env.clone());
/// let (service, mut events) = FittingService::new(transport, credentials, config)?;
///
/// service.start()?;
/// service.capture_garment(garment)?;
/// let outcome = service.capture_subject(subject).await?;
/// # let _ = (outcome, events.try_recv());
/// # Ok(())
/// # }
/// ```
pub struct FittingService<T, C> {
    machine: Arc<Mutex<FittingStateMachine>>,
    client: Arc<GenerationClient<T>>,
    preprocessor: ImagePreprocessor,
    credentials: Arc<C>,
    config: Arc<FittingConfig>,
    events: mpsc::UnboundedSender<FittingEvent>,
    countdown: Arc<watch::Sender<u64>>,
}

impl<T, C> Clone for FittingService<T, C> {
    fn clone(&self) -> Self {
        Self {
            machine: Arc::clone(&self.machine),
            client: Arc::clone(&self.client),
            preprocessor: self.preprocessor.clone(),
            credentials: Arc::clone(&self.credentials),
            config: Arc::clone(&self.config),
            events: self.events.clone(),
            countdown: Arc::clone(&self.countdown),
        }
    }
}

impl<T, C> FittingService<T, C>
where
    T: Transport + 'static,
    C: CredentialSource + 'static,
{
    /// 创建服务，同时返回事件接收端。
    pub fn new(
        transport: T,
        credentials: C,
        config: FittingConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<FittingEvent>), FittingError> {
        config.validate()?;

        let (events, receiver) = mpsc::unbounded_channel();
        let (countdown, _) = watch::channel(0);

        let service = Self {
            machine: Arc::new(Mutex::new(FittingStateMachine::new())),
            client: Arc::new(GenerationClient::new(transport, &config)),
            preprocessor: ImagePreprocessor::from_config(&config),
            credentials: Arc::new(credentials),
            config: Arc::new(config),
            events,
            countdown: Arc::new(countdown),
        };

        Ok((service, receiver))
    }

    pub fn config(&self) -> &FittingConfig {
        &self.config
    }

    pub fn client(&self) -> &GenerationClient<T> {
        &self.client
    }

    pub fn snapshot(&self) -> Result<SessionView, FittingError> {
        Ok(self.lock()?.view())
    }

    pub fn start(&self) -> Result<SessionView, FittingError> {
        self.apply(|machine| machine.start().map(|_| ()))
    }

    pub fn capture_garment(&self, image: EncodedImage) -> Result<SessionView, FittingError> {
        self.apply(|machine| machine.capture_garment(image).map(|_| ()))
    }

    /// 提交人物照片并执行生成，直到本次尝试结束才返回。
    pub async fn capture_subject(&self, image: EncodedImage) -> Result<AttemptOutcome, FittingError> {
        let ticket = {
            let mut machine = self.lock()?;
            let ticket = machine.capture_subject(image)?;
            self.emit(FittingEvent::StepChanged(machine.view()));
            ticket
        };

        self.run_attempt(ticket).await
    }

    /// 重试：冷却结束后重新提交，或在输入有问题时回到拍摄步骤。
    pub async fn retry(&self) -> Result<AttemptOutcome, FittingError> {
        let outcome = {
            let mut machine = self.lock()?;
            let outcome = machine.retry()?;
            self.emit(FittingEvent::StepChanged(machine.view()));
            outcome
        };

        match outcome {
            RetryOutcome::Resubmit(ticket) => self.run_attempt(ticket).await,
            RetryOutcome::Recapture(role) => {
                log::info!("📷 请重新拍摄 {} 照片", role.as_str());
                Ok(AttemptOutcome::Recapture(role))
            }
        }
    }

    pub fn restart(&self) -> Result<SessionView, FittingError> {
        let view = {
            let mut machine = self.lock()?;
            machine.restart();
            machine.view()
        };
        self.countdown.send_replace(0);
        self.emit(FittingEvent::StepChanged(view.clone()));
        Ok(view)
    }

    pub fn try_another_garment(&self) -> Result<SessionView, FittingError> {
        let view = self.apply(|machine| machine.try_another_garment().map(|_| ()))?;
        self.countdown.send_replace(0);
        Ok(view)
    }

    /// 等待当前冷却倒计时归零。
    pub async fn wait_retry_ready(&self) {
        let mut receiver = self.countdown.subscribe();
        // 发送端与服务同生命周期，wait_for 只会在倒计时归零时返回
        let _ = receiver.wait_for(|remaining| *remaining == 0).await;
    }

    async fn run_attempt(&self, ticket: GenerationTicket) -> Result<AttemptOutcome, FittingError> {
        let token = ticket.token;
        let started = Instant::now();

        let period = self.config.progress_interval();
        let mut ticker = interval_at(started + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut next_message = 0usize;

        self.emit(FittingEvent::Progress {
            message: INITIAL_PROGRESS_MESSAGE.to_string(),
        });

        let pipeline = self.execute(ticket);
        tokio::pin!(pipeline);

        let result = loop {
            tokio::select! {
                result = &mut pipeline => break result,
                _ = ticker.tick() => {
                    if !self.lock()?.is_in_flight(token) {
                        continue;
                    }
                    if let Some(message) = self.progress_message(next_message) {
                        self.emit(FittingEvent::Progress { message });
                        next_message = next_message.wrapping_add(1);
                    }
                }
            }
        };

        let (completion, view, retry) = {
            let mut machine = self.lock()?;
            let completion = machine.complete(token, result.clone());
            (completion, machine.view(), machine.retry_state())
        };

        if completion == Completion::Stale {
            log::info!(
                "🗑️ 会话已变更，丢弃 token={} 的结果（{}ms）",
                token.value(),
                started.elapsed().as_millis()
            );
            return Ok(AttemptOutcome::Superseded);
        }

        let last_error = view.last_error.clone();
        self.emit(FittingEvent::StepChanged(view));

        match retry {
            Some(state) => {
                self.countdown.send_replace(state.countdown_secs_remaining());
                self.spawn_countdown(token);
            }
            None => {
                self.countdown.send_replace(0);
            }
        }

        log::info!("⏱️ 本次尝试结束 total={}ms", started.elapsed().as_millis());

        Ok(match result {
            Ok(image) => AttemptOutcome::Succeeded(image),
            Err(AttemptFailure::Generation(error)) => AttemptOutcome::Failed(error),
            Err(AttemptFailure::Preprocess { .. }) => match last_error {
                Some(error) => AttemptOutcome::Failed(error),
                None => AttemptOutcome::Superseded,
            },
        })
    }

    /// 预处理 → 读取凭证 → 远端生成。
    async fn execute(&self, ticket: GenerationTicket) -> Result<EncodedImage, AttemptFailure> {
        let preprocess_start = Instant::now();
        let max_dimension_px = self.config.max_dimension_px;

        let (garment, subject) = tokio::join!(
            self.preprocess_blocking(CaptureRole::Garment, ticket.garment, max_dimension_px),
            self.preprocess_blocking(CaptureRole::Subject, ticket.subject, max_dimension_px),
        );
        let garment = garment?;
        let subject = subject?;
        let preprocess_ms = preprocess_start.elapsed().as_millis();

        let credential = self.credentials.credential();

        let generate_start = Instant::now();
        let result = self
            .client
            .generate(&garment, &subject, credential.as_deref())
            .await
            .map_err(AttemptFailure::Generation);

        log::info!(
            "⏱️ token={} preprocess={}ms generate={}ms",
            ticket.token.value(),
            preprocess_ms,
            generate_start.elapsed().as_millis()
        );

        result
    }

    async fn preprocess_blocking(
        &self,
        role: CaptureRole,
        image: EncodedImage,
        max_dimension_px: u32,
    ) -> Result<EncodedImage, AttemptFailure> {
        let preprocessor = self.preprocessor.clone();

        let joined = tokio::task::spawn_blocking(move || preprocessor.preprocess(&image, max_dimension_px))
            .await
            .map_err(|e| ImageError::Decode(format!("预处理任务异常终止：{}", e)));

        joined.and_then(|result| result).map_err(|error| {
            log::warn!("⚠️ 预处理失败 - {} [{}]：{}", role.as_str(), error.code(), error);
            AttemptFailure::Preprocess { role, error }
        })
    }

    fn spawn_countdown(&self, token: RequestToken) {
        let machine = Arc::clone(&self.machine);
        let events = self.events.clone();
        let countdown = Arc::clone(&self.countdown);

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + COUNTDOWN_PERIOD, COUNTDOWN_PERIOD);

            loop {
                ticker.tick().await;

                let (outcome, view) = match machine.lock() {
                    Ok(mut machine) => {
                        let outcome = machine.tick(token);
                        (outcome, machine.view())
                    }
                    Err(_) => {
                        log::error!("❌ 会话状态锁已中毒，倒计时终止");
                        break;
                    }
                };

                match outcome {
                    TickOutcome::Counting(state) => {
                        countdown.send_replace(state.countdown_secs_remaining());
                        let _ = events.send(FittingEvent::Countdown(state));
                    }
                    TickOutcome::Ready(state) => {
                        countdown.send_replace(0);
                        let _ = events.send(FittingEvent::Countdown(state));
                        let _ = events.send(FittingEvent::StepChanged(view));
                        log::info!("🔁 冷却结束，可以重试 - token={}", token.value());
                        break;
                    }
                    TickOutcome::Dropped => {
                        log::debug!("🗑️ 倒计时 token={} 已过期", token.value());
                        break;
                    }
                }
            }
        });
    }

    fn progress_message(&self, index: usize) -> Option<String> {
        let messages = &self.config.progress_messages;
        if messages.is_empty() {
            return None;
        }
        Some(messages[index % messages.len()].clone())
    }

    fn apply<F>(&self, action: F) -> Result<SessionView, FittingError>
    where
        F: FnOnce(&mut FittingStateMachine) -> Result<(), FittingError>,
    {
        let view = {
            let mut machine = self.lock()?;
            action(&mut machine)?;
            machine.view()
        };
        self.emit(FittingEvent::StepChanged(view.clone()));
        Ok(view)
    }

    fn lock(&self) -> Result<MutexGuard<'_, FittingStateMachine>, FittingError> {
        self.machine.lock().map_err(|_| FittingError::LockPoisoned)
    }

    fn emit(&self, event: FittingEvent) {
        if self.events.send(event).is_err() {
            log::debug!("📭 事件接收端已关闭");
        }
    }
}
