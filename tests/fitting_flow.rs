//! 端到端流程测试：通过 `FittingService` 驱动，远端由脚本化传输代替。

mod common;

use std::time::Duration;

use common::{
    ScriptedTransport, SwitchableCredential, image_reply, inline_image, jpeg, png, quota_reply,
    safety_reply, text_only_reply,
};
use fitting_room::fitting::{
    AttemptOutcome, CaptureRole, CorrectiveAction, EncodedImage, ErrorKind, FittingConfig,
    FittingError, FittingEvent, FittingService, StaticCredential, Step,
};
use tokio::sync::mpsc::UnboundedReceiver;

type Service<C> = FittingService<ScriptedTransport, C>;

fn service_with(
    transport: ScriptedTransport,
    key: &str,
    config: FittingConfig,
) -> (Service<StaticCredential>, UnboundedReceiver<FittingEvent>) {
    FittingService::new(transport, StaticCredential::new(key), config).expect("valid config")
}

fn service(transport: ScriptedTransport) -> (Service<StaticCredential>, UnboundedReceiver<FittingEvent>) {
    service_with(transport, "test-key", FittingConfig::default())
}

fn ready_for_subject<C: fitting_room::fitting::CredentialSource + 'static>(
    service: &Service<C>,
    garment: EncodedImage,
) {
    service.start().expect("start");
    service.capture_garment(garment).expect("garment captured");
}

#[tokio::test]
async fn scenario_a_both_images_bounded_and_result_applied() {
    let (service, _events) = service(ScriptedTransport::new(vec![image_reply(48, 64)]));
    ready_for_subject(&service, png(300, 400));

    let outcome = service.capture_subject(jpeg(2000, 3000)).await.expect("attempt runs");

    let AttemptOutcome::Succeeded(result) = outcome else {
        panic!("expected success, got {:?}", outcome);
    };
    assert_eq!(result.dimensions(), (48, 64));

    let transport = service.client().transport();
    assert_eq!(transport.calls(), 1);

    let request = &transport.requests()[0];
    let garment = image::load_from_memory(&inline_image(request, 0)).expect("garment decodes");
    let subject = image::load_from_memory(&inline_image(request, 1)).expect("subject decodes");
    assert_eq!((garment.width(), garment.height()), (300, 400));
    assert_eq!((subject.width(), subject.height()), (341, 512));

    let view = service.snapshot().expect("snapshot");
    assert_eq!(view.step, Step::Succeeded);
    assert_eq!(view.result_image.as_ref(), Some(&result));
    assert!(view.last_error.is_none());
    assert!(view.retry.is_none());
}

#[tokio::test]
async fn scenario_b_safety_rejection_has_no_countdown() {
    let (service, _events) = service(ScriptedTransport::new(vec![safety_reply()]));
    ready_for_subject(&service, png(64, 64));

    let outcome = service.capture_subject(png(64, 64)).await.expect("attempt runs");

    let AttemptOutcome::Failed(error) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(error.kind(), ErrorKind::ContentRejected);
    assert_eq!(error.retryable_after_secs(), 0);

    let view = service.snapshot().expect("snapshot");
    assert_eq!(view.step, Step::Failed);
    assert!(view.retry.is_none());
    assert!(view.result_image.is_none());
    assert_eq!(
        view.corrective_action,
        Some(CorrectiveAction::Recapture(CaptureRole::Subject))
    );

    let outcome = service.retry().await.expect("retry routes to recapture");
    assert!(matches!(outcome, AttemptOutcome::Recapture(CaptureRole::Subject)));
    assert_eq!(service.snapshot().expect("snapshot").step, Step::AwaitingSubjectPhoto);
    assert_eq!(service.client().transport().calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_c_quota_countdown_gates_retry_for_thirty_ticks() {
    let (service, _events) = service(ScriptedTransport::new(vec![quota_reply(), image_reply(8, 8)]));
    ready_for_subject(&service, png(64, 64));

    let outcome = service.capture_subject(png(64, 64)).await.expect("attempt runs");

    let AttemptOutcome::Failed(error) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(error.kind(), ErrorKind::RateLimited);
    assert_eq!(error.retryable_after_secs(), 30);
    assert_eq!(
        service.snapshot().expect("snapshot").corrective_action,
        Some(CorrectiveAction::WaitAndRetry)
    );

    // 定时器在整秒触发，这里错开半秒观察
    tokio::time::sleep(Duration::from_millis(500)).await;
    for tick in 1..=29u64 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            service.retry().await.expect_err("still cooling down"),
            FittingError::RetryNotReady {
                remaining_secs: 30 - tick
            }
        );
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(service.snapshot().expect("snapshot").countdown_secs_remaining(), 0);

    let outcome = service.retry().await.expect("retry accepted at tick 30");
    assert!(matches!(outcome, AttemptOutcome::Succeeded(_)));
    assert_eq!(service.client().transport().calls(), 2);
}

#[tokio::test]
async fn scenario_d_empty_credential_makes_no_network_call() {
    let (service, _events) = service_with(
        ScriptedTransport::new(vec![image_reply(8, 8)]),
        "",
        FittingConfig::default(),
    );
    ready_for_subject(&service, png(32, 32));

    let outcome = service.capture_subject(png(32, 32)).await.expect("attempt runs");

    let AttemptOutcome::Failed(error) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(error.kind(), ErrorKind::AuthMissing);
    assert_eq!(service.client().transport().calls(), 0);
    assert_eq!(
        service.snapshot().expect("snapshot").corrective_action,
        Some(CorrectiveAction::ReconfigureCredential)
    );
}

#[tokio::test]
async fn credential_is_read_again_on_retry() {
    let credential = SwitchableCredential::default();
    let (service, _events) = FittingService::new(
        ScriptedTransport::new(vec![image_reply(8, 8)]),
        credential.clone(),
        FittingConfig::default(),
    )
    .expect("valid config");
    ready_for_subject(&service, png(32, 32));

    let first = service.capture_subject(png(32, 32)).await.expect("attempt runs");
    assert!(matches!(first, AttemptOutcome::Failed(ref e) if e.kind() == ErrorKind::AuthMissing));

    credential.set(Some("rotated-key"));
    let second = service.retry().await.expect("retry runs");

    assert!(matches!(second, AttemptOutcome::Succeeded(_)));
    let requests = service.client().transport().requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].api_key, "rotated-key");
}

#[tokio::test]
async fn text_only_response_is_immediately_retryable() {
    let (service, _events) = service(ScriptedTransport::new(vec![text_only_reply(), image_reply(8, 8)]));
    ready_for_subject(&service, png(32, 32));

    let outcome = service.capture_subject(png(32, 32)).await.expect("attempt runs");
    assert!(matches!(outcome, AttemptOutcome::Failed(ref e) if e.kind() == ErrorKind::EmptyResponse));
    assert_eq!(
        service.snapshot().expect("snapshot").corrective_action,
        Some(CorrectiveAction::Retry)
    );

    let outcome = service.retry().await.expect("retry runs");
    assert!(matches!(outcome, AttemptOutcome::Succeeded(_)));
}

#[tokio::test]
async fn undecodable_garment_routes_back_to_first_capture() {
    let (service, _events) = service(ScriptedTransport::new(vec![image_reply(8, 8)]));
    ready_for_subject(&service, EncodedImage::new(vec![0xFFu8, 0xD8, 0xFF, 0x00], "image/jpeg", 10, 10));

    let outcome = service.capture_subject(png(32, 32)).await.expect("attempt runs");

    let AttemptOutcome::Failed(error) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(error.kind(), ErrorKind::Unknown);
    assert_eq!(error.retryable_after_secs(), 0);
    assert_eq!(service.client().transport().calls(), 0);

    let outcome = service.retry().await.expect("retry routes back");
    assert!(matches!(outcome, AttemptOutcome::Recapture(CaptureRole::Garment)));

    let view = service.snapshot().expect("snapshot");
    assert_eq!(view.step, Step::AwaitingGarmentPhoto);
    assert!(!view.has_garment);
    assert!(!view.has_subject);
}

#[tokio::test]
async fn restart_while_generating_drops_late_result() {
    let (service, _events) = service(ScriptedTransport::gated(vec![image_reply(8, 8)]));
    ready_for_subject(&service, png(32, 32));

    let worker = {
        let service = service.clone();
        tokio::spawn(async move { service.capture_subject(png(32, 32)).await })
    };
    service.client().transport().wait_entered().await;

    let view = service.restart().expect("restart");
    assert_eq!(view.step, Step::Idle);

    service.client().transport().release();
    let outcome = worker.await.expect("join").expect("attempt runs");

    assert!(matches!(outcome, AttemptOutcome::Superseded));
    let view = service.snapshot().expect("snapshot");
    assert_eq!(view.step, Step::Idle);
    assert!(view.result_image.is_none());
    assert!(!view.has_garment);
}

#[tokio::test]
async fn rapid_events_during_generation_keep_one_request_in_flight() {
    let (service, _events) = service(ScriptedTransport::gated(vec![image_reply(8, 8)]));
    ready_for_subject(&service, png(32, 32));

    let worker = {
        let service = service.clone();
        tokio::spawn(async move { service.capture_subject(png(32, 32)).await })
    };
    service.client().transport().wait_entered().await;

    for _ in 0..5 {
        assert_eq!(
            service.capture_subject(png(32, 32)).await.expect_err("busy"),
            FittingError::Busy
        );
        assert_eq!(service.retry().await.expect_err("busy"), FittingError::Busy);
        assert_eq!(service.capture_garment(png(32, 32)).expect_err("busy"), FittingError::Busy);
    }
    assert_eq!(service.client().transport().calls(), 1);

    service.client().transport().release();
    let outcome = worker.await.expect("join").expect("attempt runs");

    assert!(matches!(outcome, AttemptOutcome::Succeeded(_)));
    assert_eq!(service.client().transport().calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn progress_messages_rotate_only_while_generating() {
    let mut config = FittingConfig::default();
    config.progress_interval_ms = 100;
    let expected = config.progress_messages.clone();
    let (service, mut events) = service_with(ScriptedTransport::gated(vec![image_reply(8, 8)]), "k", config);
    ready_for_subject(&service, png(32, 32));

    let worker = {
        let service = service.clone();
        tokio::spawn(async move { service.capture_subject(png(32, 32)).await })
    };

    let mut progress = Vec::new();
    while progress.len() < 3 {
        match events.recv().await.expect("channel open") {
            FittingEvent::Progress { message } => progress.push(message),
            FittingEvent::StepChanged(view) => {
                assert!(matches!(
                    view.step,
                    Step::AwaitingGarmentPhoto | Step::AwaitingSubjectPhoto | Step::Generating
                ));
            }
            FittingEvent::Countdown(_) => panic!("no countdown while generating"),
        }
    }
    assert_eq!(progress[1], expected[0]);
    assert_eq!(progress[2], expected[1]);

    service.client().transport().release();
    let outcome = worker.await.expect("join").expect("attempt runs");
    assert!(matches!(outcome, AttemptOutcome::Succeeded(_)));

    let mut after_finish = Vec::new();
    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        match event {
            FittingEvent::StepChanged(view) if view.step == Step::Succeeded => finished = true,
            FittingEvent::Progress { message } if finished => after_finish.push(message),
            _ => {}
        }
    }
    assert!(finished);
    assert!(after_finish.is_empty());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn stale_countdown_stops_after_try_another_garment() {
    let transport = ScriptedTransport::new(vec![quota_reply()]);
    let (service, mut events) = service(transport);
    ready_for_subject(&service, png(32, 32));

    let outcome = service.capture_subject(png(32, 32)).await.expect("attempt runs");
    assert!(matches!(outcome, AttemptOutcome::Failed(_)));

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let view = service.try_another_garment().expect("shortcut");
    assert_eq!(view.step, Step::AwaitingGarmentPhoto);
    assert!(view.retry.is_none());

    while events.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(events.try_recv().is_err());
    assert!(service.snapshot().expect("snapshot").retry.is_none());
    service.wait_retry_ready().await;
}

#[tokio::test]
async fn shared_service_clones_see_same_session() {
    let (service, _events) = service(ScriptedTransport::new(Vec::new()));
    let other = service.clone();

    service.start().expect("start");

    assert_eq!(other.snapshot().expect("snapshot").step, Step::AwaitingGarmentPhoto);
    other.restart().expect("restart");
    assert_eq!(service.snapshot().expect("snapshot").step, Step::Idle);
}
