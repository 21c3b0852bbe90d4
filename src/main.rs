//! # 虚拟试衣：命令行驱动
//!
//! 代替拍摄组件与展示层跑通一次完整流程：
//! 读取两张照片 → 生成 → 打印进度/倒计时 → 写出结果图。
//!
//! 用法：`fitting-room <衣服照片> <人物照片> [--output PATH] [--config PATH] [--profile NAME]`

use std::path::PathBuf;
use std::process::ExitCode;

use fitting_room::error::AppError;
use fitting_room::fitting::{
    AttemptOutcome, CaptureLoader, CaptureRole, ClassifiedError, CorrectiveAction, EnvCredential,
    ErrorKind, FittingEvent, FittingService, HttpTransport, PreprocessProfile,
};
use fitting_room::settings;

const MAX_ATTEMPTS: u32 = 3;
const DEFAULT_SETTINGS_FILE: &str = "fitting-room.json";

struct CliArgs {
    garment: String,
    subject: String,
    output: PathBuf,
    config: PathBuf,
    profile: Option<PreprocessProfile>,
}

fn usage(program: &str) -> String {
    format!(
        "用法：{} <衣服照片> <人物照片> [--output PATH] [--config PATH] [--profile quality|balanced|speed]",
        program
    )
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let program = args.first().map(String::as_str).unwrap_or("fitting-room");
    let mut positional = Vec::new();
    let mut output = None;
    let mut config = None;
    let mut profile = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--output" | "-o" => {
                output = Some(iter.next().map(PathBuf::from).ok_or_else(|| usage(program))?)
            }
            "--config" | "-c" => {
                config = Some(iter.next().map(PathBuf::from).ok_or_else(|| usage(program))?)
            }
            "--profile" | "-p" => {
                let value = iter.next().ok_or_else(|| usage(program))?;
                profile = Some(PreprocessProfile::parse(value).map_err(|e| e.to_string())?);
            }
            "--help" | "-h" => return Err(usage(program)),
            _ => positional.push(arg.clone()),
        }
    }

    let [garment, subject] = <[String; 2]>::try_from(positional).map_err(|_| usage(program))?;

    Ok(CliArgs {
        garment,
        subject,
        output: output.unwrap_or_else(|| PathBuf::from("fitting-result")),
        config: config.unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE)),
        profile,
    })
}

fn describe(action: Option<CorrectiveAction>) -> &'static str {
    match action {
        Some(CorrectiveAction::WaitAndRetry) => "请等待倒计时结束后重试",
        Some(CorrectiveAction::Retry) => "可以直接重试",
        Some(CorrectiveAction::ReconfigureCredential) => "请设置有效的 API Key 后重试",
        Some(CorrectiveAction::Recapture(CaptureRole::Garment)) => "请重新拍摄衣服照片",
        Some(CorrectiveAction::Recapture(CaptureRole::Subject)) => "请重新拍摄人物照片",
        None => "",
    }
}

fn print_event(event: FittingEvent) {
    match event {
        FittingEvent::StepChanged(view) => println!("[{}]", view.step.as_str()),
        FittingEvent::Progress { message } => println!("  {}", message),
        FittingEvent::Countdown(state) => {
            println!("  {} 秒后可重试", state.countdown_secs_remaining())
        }
    }
}

async fn run(cli: CliArgs) -> Result<PathBuf, AppError> {
    let mut config = settings::load_or_init_settings(&cli.config)?;
    if let Some(profile) = cli.profile {
        config.apply_profile(profile);
        log::info!("⚙️ 使用预处理档位：{}", profile.as_str());
    }

    let loader = CaptureLoader::from_config(&config);
    let garment = loader.load(&cli.garment)?;
    let subject = loader.load(&cli.subject)?;

    let transport = HttpTransport::new(&config)?;
    let credentials = EnvCredential::new(config.credential_env.clone());
    let (service, mut events) = FittingService::new(transport, credentials, config)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(event);
        }
    });

    service.start()?;
    service.capture_garment(garment)?;
    let mut outcome = service.capture_subject(subject).await?;
    let mut attempts = 1;

    let result = loop {
        match outcome {
            AttemptOutcome::Succeeded(image) => break Ok(image),
            AttemptOutcome::Failed(error) if can_auto_retry(&error) && attempts < MAX_ATTEMPTS => {
                log::info!("🔁 第 {}/{} 次尝试失败：{}", attempts, MAX_ATTEMPTS, error);
                service.wait_retry_ready().await;
                outcome = service.retry().await?;
                attempts += 1;
            }
            AttemptOutcome::Failed(error) => break Err(error),
            AttemptOutcome::Recapture(_) | AttemptOutcome::Superseded => {
                let view = service.snapshot()?;
                break Err(view
                    .last_error
                    .unwrap_or_else(|| ClassifiedError::new(ErrorKind::Unknown, "会话已结束", 0)));
            }
        }
    };

    let corrective_action = service.snapshot()?.corrective_action;
    drop(service);

    match result {
        Ok(image) => {
            let _ = printer.await;
            let path = cli.output.with_extension(image.file_extension());
            std::fs::write(&path, image.bytes())?;
            Ok(path)
        }
        Err(error) => {
            // 失败时可能仍有倒计时任务持有事件发送端
            printer.abort();
            eprintln!("{}", describe(corrective_action));
            Err(error.into())
        }
    }
}

fn can_auto_retry(error: &ClassifiedError) -> bool {
    !error.kind().needs_user_action() && error.kind() != ErrorKind::Unknown
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    match run(cli).await {
        Ok(path) => {
            println!("试衣结果已保存：{}", path.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("❌ 试衣失败：{}", err);
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
