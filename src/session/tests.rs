use super::*;
use crate::camera::{CameraClientBuilder, CameraTransport, MockTransport, OperationKind, TransportError};
use crate::config::{GopilotConfig, StopFailurePolicy};
use crate::error::{CameraError, GopilotError, SessionError};
use crate::events::EventBus;
use crate::infrastructure::{AuditEntry, AuditEventKind, AuditLog, AuditReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

struct Harness {
    mock: Arc<MockTransport>,
    machine: Arc<SessionStateMachine>,
    audit_path: PathBuf,
    _temp_dir: TempDir,
}

impl Harness {
    async fn entries(&self) -> Vec<AuditEntry> {
        AuditReader::new(&self.audit_path).read_all().await.unwrap()
    }

    async fn kinds(&self) -> Vec<AuditEventKind> {
        self.entries().await.iter().map(|e| e.event_kind).collect()
    }
}

fn create_test_config() -> GopilotConfig {
    let mut config = GopilotConfig::default();
    config.camera.request_timeout_ms = 200;
    config.retry.max_retries = 1;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    config.breaker.failure_threshold = 3;
    config.breaker.cooldown_ms = 60_000;
    config.readiness.framing = 0.8;
    config.readiness.lighting = 0.8;
    config.readiness.motion = 0.8;
    config.readiness.poll_interval_ms = 5;
    config.session.capture_seconds = 0;
    config
}

async fn create_harness(config: GopilotConfig) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let audit_path = temp_dir.path().join("audit.jsonl");
    let mock = Arc::new(MockTransport::new());
    let client = CameraClientBuilder::new()
        .config(config.clone())
        .transport(Arc::clone(&mock) as Arc<dyn CameraTransport>)
        .build()
        .unwrap();
    let audit = Arc::new(AuditLog::open(&audit_path).await.unwrap());
    let machine = SessionStateMachine::new(
        Arc::new(client),
        audit,
        ReadinessThresholds::from(&config.readiness),
        config.session.stop_failure_policy,
    );

    Harness {
        mock,
        machine: Arc::new(machine),
        audit_path,
        _temp_dir: temp_dir,
    }
}

fn ready() -> ReadinessScore {
    ReadinessScore::new(0.9, 0.9, 0.9).unwrap()
}

fn not_ready() -> ReadinessScore {
    ReadinessScore::new(0.9, 0.5, 0.9).unwrap()
}

fn refused() -> TransportError {
    TransportError::Connect("connection refused".to_string())
}

fn video_intent() -> CameraIntent {
    CameraIntent::new("walk through the market", crate::camera::CameraMode::Video)
}

/// Start a session and bring it to CAPTURING
async fn start_capturing(harness: &Harness) -> String {
    let session_id = harness.machine.start_session(video_intent()).await.unwrap();
    harness.machine.tick(ready()).await.unwrap();
    harness.machine.confirm().await.unwrap();
    session_id
}

#[tokio::test]
async fn test_ready_scores_lead_to_single_capture() {
    let harness = create_harness(create_test_config()).await;

    harness.machine.start_session(video_intent()).await.unwrap();
    assert_eq!(harness.machine.state().await, SessionState::Guiding);

    assert_eq!(harness.machine.tick(ready()).await.unwrap(), SessionState::ReadyToShoot);
    assert_eq!(harness.machine.confirm().await.unwrap(), SessionState::Capturing);

    assert_eq!(harness.mock.request_count(OperationKind::StartCapture), 1);
    assert!(harness.mock.is_capturing());
    assert_eq!(
        harness.kinds().await,
        vec![
            AuditEventKind::SessionStarted,
            AuditEventKind::ReadyToShoot,
            AuditEventKind::CaptureStarted
        ]
    );
}

#[tokio::test]
async fn test_low_scores_keep_guiding() {
    let harness = create_harness(create_test_config()).await;
    harness.machine.start_session(video_intent()).await.unwrap();

    for _ in 0..5 {
        assert_eq!(harness.machine.tick(not_ready()).await.unwrap(), SessionState::Guiding);
    }
    // Exactly at the threshold is not enough
    let borderline = ReadinessScore::new(0.8, 0.8, 0.8).unwrap();
    assert_eq!(harness.machine.tick(borderline).await.unwrap(), SessionState::Guiding);

    let record = harness.machine.snapshot().await.unwrap();
    assert_eq!(record.last_scores, Some(borderline));
    assert_eq!(harness.kinds().await, vec![AuditEventKind::SessionStarted]);
}

#[tokio::test]
async fn test_start_mode_switch() {
    let harness = create_harness(create_test_config()).await;
    let intent = CameraIntent::parse("timelapse of clouds", "timelapse").unwrap();

    harness.machine.start_session(intent).await.unwrap();

    assert_eq!(harness.mock.mode(), crate::camera::CameraMode::Timelapse);
    let entries = harness.entries().await;
    assert_eq!(entries[0].detail["mode"], "timelapse");
    assert_eq!(entries[0].detail["objective"], "timelapse of clouds");
}

#[tokio::test]
async fn test_start_while_active_is_rejected() {
    let harness = create_harness(create_test_config()).await;
    let first = harness.machine.start_session(video_intent()).await.unwrap();
    harness.machine.tick(ready()).await.unwrap();

    match harness.machine.start_session(video_intent()).await {
        Err(GopilotError::Session(SessionError::AlreadyActive { session_id })) => {
            assert_eq!(session_id, first)
        }
        other => panic!("Expected already active, got {:?}", other),
    }

    assert_eq!(harness.machine.active_session_id().await, Some(first));
    assert_eq!(harness.machine.state().await, SessionState::ReadyToShoot);
    assert_eq!(harness.mock.request_count(OperationKind::SetMode), 1);
    assert_eq!(harness.entries().await.len(), 2);
}

#[tokio::test]
async fn test_concurrent_starts_admit_one() {
    let harness = create_harness(create_test_config()).await;
    harness.mock.set_latency(Duration::from_millis(20));

    let (a, b) = tokio::join!(
        harness.machine.start_session(video_intent()),
        harness.machine.start_session(video_intent())
    );

    assert!(a.is_ok() != b.is_ok());
    assert_eq!(harness.mock.request_count(OperationKind::SetMode), 1);
}

#[tokio::test]
async fn test_start_during_failing_start_is_rejected() {
    let harness = create_harness(create_test_config()).await;
    harness.mock.set_latency(Duration::from_millis(30));
    harness.mock.fail_operation(OperationKind::SetMode, 2, refused());

    let (first, second) = tokio::join!(harness.machine.start_session(video_intent()), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        harness.machine.start_session(video_intent()).await
    });

    assert!(matches!(
        first,
        Err(GopilotError::Camera(CameraError::Transient { .. }))
    ));
    // Rejected while the first start was still switching modes, not run after it
    assert!(matches!(
        second,
        Err(GopilotError::Session(SessionError::AlreadyActive { .. }))
    ));
    assert_eq!(harness.mock.request_count(OperationKind::SetMode), 2);
    assert_eq!(harness.machine.state().await, SessionState::Idle);
    assert_eq!(harness.kinds().await, vec![AuditEventKind::SessionAborted]);

    harness.mock.set_latency(Duration::ZERO);
    harness.machine.start_session(video_intent()).await.unwrap();
}

#[tokio::test]
async fn test_dropped_start_releases_claim() {
    let harness = create_harness(create_test_config()).await;
    harness.mock.set_latency(Duration::from_millis(50));

    let timed_out = tokio::time::timeout(
        Duration::from_millis(10),
        harness.machine.start_session(video_intent()),
    )
    .await;
    assert!(timed_out.is_err());

    harness.mock.set_latency(Duration::ZERO);
    harness.machine.start_session(video_intent()).await.unwrap();
    assert_eq!(harness.machine.state().await, SessionState::Guiding);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tick_and_stop_keep_audit_order() {
    let harness = create_harness(create_test_config()).await;

    for _ in 0..100 {
        harness.machine.start_session(video_intent()).await.unwrap();

        let ticker = Arc::clone(&harness.machine);
        let stopper = Arc::clone(&harness.machine);
        let tick = tokio::spawn(async move { ticker.tick(ready()).await });
        let stop = tokio::spawn(async move { stopper.stop_session(None).await });
        tick.await.unwrap().unwrap();
        stop.await.unwrap().unwrap();

        assert_eq!(harness.machine.state().await, SessionState::Idle);
    }

    let entries = harness.entries().await;
    let mut sessions: Vec<(String, Vec<AuditEventKind>)> = Vec::new();
    for entry in &entries {
        match sessions.iter_mut().find(|(id, _)| *id == entry.session_id) {
            Some((_, kinds)) => kinds.push(entry.event_kind),
            None => sessions.push((entry.session_id.clone(), vec![entry.event_kind])),
        }
    }

    assert_eq!(sessions.len(), 100);
    for (session_id, kinds) in &sessions {
        assert_eq!(
            kinds.last(),
            Some(&AuditEventKind::SessionStopped),
            "entry after the terminal one in {}: {:?}",
            session_id,
            kinds
        );
        assert_eq!(
            kinds.iter().filter(|k| **k == AuditEventKind::SessionStopped).count(),
            1
        );
    }
}

#[tokio::test]
async fn test_bogus_mode_never_leaves_idle() {
    let harness = create_harness(create_test_config()).await;

    assert!(matches!(
        CameraIntent::parse("anything", "bogus"),
        Err(CameraError::InvalidParameter { .. })
    ));
    assert!(matches!(
        harness.machine.client().set_mode_named("bogus").await,
        Err(CameraError::InvalidParameter { .. })
    ));

    assert_eq!(harness.machine.state().await, SessionState::Idle);
    assert_eq!(harness.mock.total_requests(), 0);
    assert!(harness.entries().await.is_empty());
}

#[tokio::test]
async fn test_set_mode_failure_aborts_session() {
    let harness = create_harness(create_test_config()).await;
    harness.mock.fail_operation(OperationKind::SetMode, 2, refused());

    let result = harness.machine.start_session(video_intent()).await;
    assert!(matches!(
        result,
        Err(GopilotError::Camera(CameraError::Transient { attempts: 2, .. }))
    ));

    assert_eq!(harness.machine.state().await, SessionState::Idle);
    assert_eq!(harness.machine.active_session_id().await, None);
    let entries = harness.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_kind, AuditEventKind::SessionAborted);
    assert_eq!(entries[0].from_state, SessionState::Idle);
    assert_eq!(entries[0].to_state, SessionState::Idle);
    assert_eq!(entries[0].detail["error_kind"], "transient");

    // The failed session left nothing behind
    harness.machine.start_session(video_intent()).await.unwrap();
}

#[tokio::test]
async fn test_capture_start_failure_falls_back_to_guiding() {
    let harness = create_harness(create_test_config()).await;
    harness.machine.start_session(video_intent()).await.unwrap();
    harness.machine.tick(ready()).await.unwrap();
    harness.mock.fail_operation(OperationKind::StartCapture, 2, refused());

    assert!(matches!(
        harness.machine.confirm().await,
        Err(GopilotError::Camera(CameraError::Transient { .. }))
    ));
    assert_eq!(harness.machine.state().await, SessionState::Guiding);

    // Guidance resumes and a later capture succeeds
    harness.machine.tick(ready()).await.unwrap();
    assert_eq!(harness.machine.confirm().await.unwrap(), SessionState::Capturing);
    assert_eq!(
        harness.kinds().await,
        vec![
            AuditEventKind::SessionStarted,
            AuditEventKind::ReadyToShoot,
            AuditEventKind::CaptureStartFailed,
            AuditEventKind::ReadyToShoot,
            AuditEventKind::CaptureStarted
        ]
    );
}

#[tokio::test]
async fn test_capture_start_failure_opening_breaker_is_fatal() {
    let mut config = create_test_config();
    config.breaker.failure_threshold = 2;
    let harness = create_harness(config).await;
    harness.machine.start_session(video_intent()).await.unwrap();
    harness.machine.tick(ready()).await.unwrap();
    harness.mock.fail_operation(OperationKind::StartCapture, 2, refused());

    assert!(harness.machine.confirm().await.is_err());

    assert_eq!(harness.machine.state().await, SessionState::Idle);
    let entries = harness.entries().await;
    let last = entries.last().unwrap();
    assert_eq!(last.event_kind, AuditEventKind::SessionFatal);
    assert_eq!(last.from_state, SessionState::ReadyToShoot);
    assert_eq!(last.detail["circuit"], "OPEN");
    assert_eq!(
        entries.iter().filter(|e| e.event_kind.is_terminal()).count(),
        1
    );
}

#[tokio::test]
async fn test_circuit_open_on_confirm_is_fatal() {
    let mut config = create_test_config();
    config.retry.max_retries = 0;
    config.breaker.failure_threshold = 1;
    let harness = create_harness(config).await;
    harness.machine.start_session(video_intent()).await.unwrap();
    harness.machine.tick(ready()).await.unwrap();

    // An unrelated status poll fails and opens the breaker
    harness.mock.fail_next(1, refused());
    assert!(harness.machine.client().get_status().await.is_err());

    assert!(matches!(
        harness.machine.confirm().await,
        Err(GopilotError::Camera(CameraError::CircuitOpen { .. }))
    ));
    assert_eq!(harness.machine.state().await, SessionState::Idle);
    assert_eq!(harness.mock.request_count(OperationKind::StartCapture), 0);
    assert_eq!(harness.kinds().await.last(), Some(&AuditEventKind::SessionFatal));
}

#[tokio::test]
async fn test_capture_stop_failure_logs_and_continues() {
    let harness = create_harness(create_test_config()).await;
    start_capturing(&harness).await;
    harness.mock.fail_operation(OperationKind::StopCapture, 2, refused());

    assert_eq!(harness.machine.stop_capture().await.unwrap(), SessionState::Reviewing);

    let entries = harness.entries().await;
    let last = entries.last().unwrap();
    assert_eq!(last.event_kind, AuditEventKind::CaptureStopAnomaly);
    assert_eq!(last.to_state, SessionState::Reviewing);
    assert!(last.detail["error"].as_str().unwrap().contains("stop_capture"));
}

#[tokio::test]
async fn test_capture_stop_failure_escalates() {
    let mut config = create_test_config();
    config.session.stop_failure_policy = StopFailurePolicy::Escalate;
    let harness = create_harness(config).await;
    start_capturing(&harness).await;
    harness.mock.fail_operation(OperationKind::StopCapture, 2, refused());

    assert!(harness.machine.stop_capture().await.is_err());

    assert_eq!(harness.machine.state().await, SessionState::Idle);
    let entries = harness.entries().await;
    let last = entries.last().unwrap();
    assert_eq!(last.event_kind, AuditEventKind::SessionFatal);
    assert_eq!(last.from_state, SessionState::Capturing);
}

#[tokio::test]
async fn test_stop_session_is_idempotent() {
    let harness = create_harness(create_test_config()).await;

    assert_eq!(
        harness.machine.stop_session(None).await.unwrap(),
        StopOutcome::NoActiveSession
    );

    let session_id = harness.machine.start_session(video_intent()).await.unwrap();
    assert_eq!(
        harness.machine.stop_session(Some(&session_id)).await.unwrap(),
        StopOutcome::Stopped {
            session_id: session_id.clone(),
            from_state: SessionState::Guiding
        }
    );
    assert_eq!(
        harness.machine.stop_session(Some(&session_id)).await.unwrap(),
        StopOutcome::NoActiveSession
    );
    assert_eq!(
        harness.machine.stop_session(None).await.unwrap(),
        StopOutcome::NoActiveSession
    );

    let stops = harness
        .entries()
        .await
        .iter()
        .filter(|e| e.event_kind == AuditEventKind::SessionStopped)
        .count();
    assert_eq!(stops, 1);
}

#[tokio::test]
async fn test_stop_session_with_other_id_leaves_session() {
    let harness = create_harness(create_test_config()).await;
    let session_id = harness.machine.start_session(video_intent()).await.unwrap();

    assert_eq!(
        harness.machine.stop_session(Some("someone-else")).await.unwrap(),
        StopOutcome::NotActiveSession {
            active_session_id: session_id.clone()
        }
    );
    assert_eq!(harness.machine.active_session_id().await, Some(session_id));
    assert_eq!(harness.entries().await.len(), 1);
}

#[tokio::test]
async fn test_stop_session_while_capturing_stops_camera() {
    let harness = create_harness(create_test_config()).await;
    start_capturing(&harness).await;

    let outcome = harness.machine.stop_session(None).await.unwrap();
    assert!(matches!(
        outcome,
        StopOutcome::Stopped {
            from_state: SessionState::Capturing,
            ..
        }
    ));

    assert!(!harness.mock.is_capturing());
    assert_eq!(harness.mock.request_count(OperationKind::StopCapture), 1);
    let entries = harness.entries().await;
    let last = entries.last().unwrap();
    assert_eq!(last.event_kind, AuditEventKind::SessionStopped);
    assert_eq!(last.detail["stop_capture"], "ok");
    assert_eq!(last.detail["reason"], "requested");
}

#[tokio::test]
async fn test_invalid_actions_change_nothing() {
    let harness = create_harness(create_test_config()).await;

    assert!(matches!(
        harness.machine.confirm().await,
        Err(GopilotError::Session(SessionError::NoActiveSession))
    ));
    assert!(matches!(
        harness.machine.stop_capture().await,
        Err(GopilotError::Session(SessionError::NoActiveSession))
    ));
    assert_eq!(harness.machine.tick(ready()).await.unwrap(), SessionState::Idle);

    harness.machine.start_session(video_intent()).await.unwrap();
    match harness.machine.confirm().await {
        Err(GopilotError::Session(e @ SessionError::InvalidTransition { .. })) => {
            assert_eq!(e.to_string(), "Cannot confirm while GUIDING")
        }
        other => panic!("Expected invalid transition, got {:?}", other),
    }
    assert!(matches!(
        harness.machine.stop_capture().await,
        Err(GopilotError::Session(SessionError::InvalidTransition { .. }))
    ));
    assert!(matches!(
        harness.machine.tick(ReadinessScore { framing: 2.0, lighting: 0.9, motion: 0.9 }).await,
        Err(GopilotError::Session(SessionError::InvalidReadiness { .. }))
    ));

    assert_eq!(harness.machine.state().await, SessionState::Guiding);
    assert_eq!(harness.kinds().await, vec![AuditEventKind::SessionStarted]);
    assert_eq!(harness.mock.total_requests(), 1);
}

#[tokio::test]
async fn test_entries_are_published() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config();
    let mock: Arc<dyn CameraTransport> = Arc::new(MockTransport::new());
    let client = CameraClientBuilder::new()
        .config(config.clone())
        .transport(mock)
        .build()
        .unwrap();
    let audit = Arc::new(AuditLog::open(temp_dir.path().join("audit.jsonl")).await.unwrap());
    let events = EventBus::new(16);
    let mut receiver = events.subscribe();
    let machine = SessionStateMachine::new(
        Arc::new(client),
        audit,
        ReadinessThresholds::from(&config.readiness),
        StopFailurePolicy::LogAndContinue,
    )
    .with_events(events);

    let session_id = machine.start_session(video_intent()).await.unwrap();
    machine.stop_session(None).await.unwrap();

    let started = receiver.recv().await.unwrap();
    assert_eq!(started.session_id, session_id);
    assert_eq!(started.event_kind, AuditEventKind::SessionStarted);
    assert_eq!(receiver.recv().await.unwrap().event_kind, AuditEventKind::SessionStopped);
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Start,
    TickReady,
    TickLow,
    Confirm,
    StopCapture,
    StopSession,
}

const ACTIONS: [Action; 6] = [
    Action::Start,
    Action::TickReady,
    Action::TickLow,
    Action::Confirm,
    Action::StopCapture,
    Action::StopSession,
];

#[derive(Debug, Clone, Copy)]
struct CameraBehavior {
    fail_start: bool,
    fail_stop: bool,
    failure_threshold: u32,
}

fn transition_allowed(kind: AuditEventKind, from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    match kind {
        AuditEventKind::SessionStarted => from == Idle && to == Guiding,
        AuditEventKind::SessionAborted => from == Idle && to == Idle,
        AuditEventKind::ReadyToShoot => from == Guiding && to == ReadyToShoot,
        AuditEventKind::CaptureStarted => from == ReadyToShoot && to == Capturing,
        AuditEventKind::CaptureStartFailed => from == ReadyToShoot && to == Guiding,
        AuditEventKind::CaptureStopped | AuditEventKind::CaptureStopAnomaly => {
            from == Capturing && to == Reviewing
        }
        AuditEventKind::SessionStopped => from != Idle && to == Idle,
        AuditEventKind::SessionFatal => (from == ReadyToShoot || from == Capturing) && to == Idle,
    }
}

fn drain(receiver: &mut broadcast::Receiver<AuditEntry>) -> Vec<AuditEntry> {
    let mut entries = Vec::new();
    while let Ok(entry) = receiver.try_recv() {
        entries.push(entry);
    }
    entries
}

async fn check_sequences(behavior: CameraBehavior, policy: StopFailurePolicy, audit: Arc<AuditLog>) {
    const DEPTH: u32 = 4;
    let mut config = create_test_config();
    config.retry.max_retries = 0;
    config.breaker.failure_threshold = behavior.failure_threshold;

    for index in 0..ACTIONS.len().pow(DEPTH) {
        let mock = Arc::new(MockTransport::new());
        if behavior.fail_start {
            mock.fail_operation(OperationKind::StartCapture, 8, refused());
        }
        if behavior.fail_stop {
            mock.fail_operation(OperationKind::StopCapture, 8, refused());
        }
        let client = CameraClientBuilder::new()
            .config(config.clone())
            .transport(Arc::clone(&mock) as Arc<dyn CameraTransport>)
            .build()
            .unwrap();
        let events = EventBus::new(16);
        let mut receiver = events.subscribe();
        let machine = SessionStateMachine::new(
            Arc::new(client),
            Arc::clone(&audit),
            ReadinessThresholds::from(&config.readiness),
            policy,
        )
        .with_events(events);

        let mut digits = index;
        let mut sequence = Vec::new();
        for _ in 0..DEPTH {
            sequence.push(ACTIONS[digits % ACTIONS.len()]);
            digits /= ACTIONS.len();
        }

        for (step, action) in sequence.iter().enumerate() {
            let before = machine.state().await;
            let rejected = match action {
                Action::Start => is_rejection(machine.start_session(video_intent()).await),
                Action::TickReady => is_rejection(machine.tick(ready()).await),
                Action::TickLow => is_rejection(machine.tick(not_ready()).await),
                Action::Confirm => is_rejection(machine.confirm().await),
                Action::StopCapture => is_rejection(machine.stop_capture().await),
                Action::StopSession => {
                    let outcome = machine.stop_session(None).await.unwrap();
                    outcome == StopOutcome::NoActiveSession
                }
            };
            let after = machine.state().await;
            let entries = drain(&mut receiver);
            let context = format!("{:?}/{:?} {:?} step {}", behavior, policy, sequence, step);

            assert!(entries.len() <= 1, "{}: more than one entry", context);
            if rejected {
                assert!(entries.is_empty(), "{}: rejected action wrote an entry", context);
                assert_eq!(before, after, "{}: rejected action changed state", context);
                continue;
            }
            match entries.first() {
                Some(entry) => {
                    assert_eq!(entry.from_state, before, "{}", context);
                    assert_eq!(entry.to_state, after, "{}", context);
                    assert!(
                        transition_allowed(entry.event_kind, before, after),
                        "{}: {} {} -> {} not allowed",
                        context,
                        entry.event_kind,
                        before,
                        after
                    );
                }
                None => assert_eq!(before, after, "{}: silent state change", context),
            }
        }
    }
}

/// Whether the action was refused without touching the session
fn is_rejection<T>(result: crate::error::Result<T>) -> bool {
    matches!(
        result,
        Err(GopilotError::Session(
            SessionError::AlreadyActive { .. }
                | SessionError::NoActiveSession
                | SessionError::InvalidTransition { .. }
        ))
    )
}

#[tokio::test]
async fn test_transitions_stay_within_table() {
    let temp_dir = TempDir::new().unwrap();
    let audit = Arc::new(AuditLog::open(temp_dir.path().join("audit.jsonl")).await.unwrap());
    let behavior = |fail_start, fail_stop, failure_threshold| CameraBehavior {
        fail_start,
        fail_stop,
        failure_threshold,
    };

    let cases = [
        (behavior(false, false, 1_000), StopFailurePolicy::LogAndContinue),
        (behavior(true, false, 1_000), StopFailurePolicy::LogAndContinue),
        (behavior(false, true, 1_000), StopFailurePolicy::LogAndContinue),
        (behavior(false, true, 1_000), StopFailurePolicy::Escalate),
        (behavior(true, true, 1), StopFailurePolicy::LogAndContinue),
        (behavior(false, true, 1), StopFailurePolicy::LogAndContinue),
    ];
    for (behavior, policy) in cases {
        check_sequences(behavior, policy, Arc::clone(&audit)).await;
    }
}

#[tokio::test]
async fn test_runner_completes_session() {
    let harness = create_harness(create_test_config()).await;
    let runner = SessionRunner::new(
        Arc::clone(&harness.machine),
        RunnerSettings::from(&create_test_config()),
        CancellationToken::new(),
    );
    let mut source = ScriptedReadiness::new(vec![not_ready(), not_ready(), ready()]).repeat_last();

    let summary = runner.run(video_intent(), &mut source, None).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.final_state, SessionState::Reviewing);
    assert_eq!(summary.captures, 1);
    assert_eq!(harness.machine.state().await, SessionState::Idle);
    assert_eq!(harness.mock.request_count(OperationKind::StartCapture), 1);
    assert_eq!(harness.mock.request_count(OperationKind::StopCapture), 1);
    assert_eq!(
        harness.kinds().await,
        vec![
            AuditEventKind::SessionStarted,
            AuditEventKind::ReadyToShoot,
            AuditEventKind::CaptureStarted,
            AuditEventKind::CaptureStopped,
            AuditEventKind::SessionStopped
        ]
    );
    assert_eq!(harness.entries().await.last().unwrap().detail["reason"], "completed");
}

#[tokio::test]
async fn test_runner_feed_exhausted() {
    let harness = create_harness(create_test_config()).await;
    let runner = SessionRunner::new(
        Arc::clone(&harness.machine),
        RunnerSettings::from(&create_test_config()),
        CancellationToken::new(),
    );
    let mut source = ScriptedReadiness::new(vec![not_ready(), not_ready()]);

    let summary = runner.run(video_intent(), &mut source, None).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::FeedExhausted);
    assert_eq!(summary.final_state, SessionState::Guiding);
    assert_eq!(summary.ticks, 3);
    assert_eq!(summary.captures, 0);
    assert_eq!(harness.machine.state().await, SessionState::Idle);
}

#[tokio::test]
async fn test_runner_tick_limit() {
    let mut config = create_test_config();
    config.readiness.max_ticks = 4;
    let harness = create_harness(config.clone()).await;
    let runner = SessionRunner::new(
        Arc::clone(&harness.machine),
        RunnerSettings::from(&config),
        CancellationToken::new(),
    );
    let mut source = ScriptedReadiness::new(vec![not_ready()]).repeat_last();

    let summary = runner.run(video_intent(), &mut source, None).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::TickLimit);
    assert_eq!(summary.ticks, 4);
}

#[tokio::test]
async fn test_runner_cancellation() {
    let harness = create_harness(create_test_config()).await;
    let token = CancellationToken::new();
    let runner = SessionRunner::new(
        Arc::clone(&harness.machine),
        RunnerSettings::from(&create_test_config()),
        token.clone(),
    );
    let mut source = ScriptedReadiness::new(vec![not_ready()]).repeat_last();

    let cancel = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    });
    let summary = runner.run(video_intent(), &mut source, None).await.unwrap();
    cancel.await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Cancelled);
    assert_eq!(harness.kinds().await.last(), Some(&AuditEventKind::SessionStopped));
}

#[tokio::test]
async fn test_runner_manual_confirm_and_stop() {
    let mut config = create_test_config();
    config.session.auto_confirm = false;
    config.session.capture_seconds = 3600;
    let harness = create_harness(config.clone()).await;
    let runner = SessionRunner::new(
        Arc::clone(&harness.machine),
        RunnerSettings::from(&config),
        CancellationToken::new(),
    );
    let mut source = ScriptedReadiness::new(vec![ready()]).repeat_last();
    let (sender, receiver) = mpsc::channel(4);
    let machine = Arc::clone(&harness.machine);

    let driver = tokio::spawn(async move {
        while machine.state().await != SessionState::ReadyToShoot {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        sender.send(ControlCommand::Confirm).await.unwrap();
        while machine.state().await != SessionState::Capturing {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        sender.send(ControlCommand::StopCapture).await.unwrap();
    });

    let summary = runner
        .run(video_intent(), &mut source, Some(receiver))
        .await
        .unwrap();
    driver.await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.captures, 1);
    assert_eq!(harness.mock.request_count(OperationKind::StartCapture), 1);
}

#[tokio::test]
async fn test_runner_stop_session_command() {
    let harness = create_harness(create_test_config()).await;
    let runner = SessionRunner::new(
        Arc::clone(&harness.machine),
        RunnerSettings::from(&create_test_config()),
        CancellationToken::new(),
    );
    let mut source = ScriptedReadiness::new(vec![not_ready()]).repeat_last();
    let (sender, receiver) = mpsc::channel(4);
    sender.send(ControlCommand::StopSession).await.unwrap();

    let summary = runner
        .run(video_intent(), &mut source, Some(receiver))
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::StoppedByUser);
    assert_eq!(harness.machine.state().await, SessionState::Idle);
}

#[tokio::test]
async fn test_runner_reports_fatal_errors() {
    let mut config = create_test_config();
    config.retry.max_retries = 0;
    config.breaker.failure_threshold = 1;
    let harness = create_harness(config.clone()).await;
    harness.mock.fail_operation(OperationKind::StartCapture, 1, refused());
    let runner = SessionRunner::new(
        Arc::clone(&harness.machine),
        RunnerSettings::from(&config),
        CancellationToken::new(),
    );
    let mut source = ScriptedReadiness::new(vec![ready()]).repeat_last();

    let summary = runner.run(video_intent(), &mut source, None).await.unwrap();

    assert!(matches!(summary.outcome, RunOutcome::Fatal { .. }));
    assert_eq!(summary.captures, 0);
    assert_eq!(harness.kinds().await.last(), Some(&AuditEventKind::SessionFatal));
}

#[tokio::test]
async fn test_runner_start_failure_is_an_error() {
    let harness = create_harness(create_test_config()).await;
    harness.mock.set_offline(true);
    let runner = SessionRunner::new(
        Arc::clone(&harness.machine),
        RunnerSettings::from(&create_test_config()),
        CancellationToken::new(),
    );
    let mut source = ScriptedReadiness::new(vec![ready()]);

    assert!(runner.run(video_intent(), &mut source, None).await.is_err());
    assert_eq!(harness.kinds().await, vec![AuditEventKind::SessionAborted]);
}

#[tokio::test]
async fn test_runner_honors_requested_duration() {
    let mut config = create_test_config();
    config.session.capture_seconds = 3600;
    let harness = create_harness(config.clone()).await;
    let runner = SessionRunner::new(
        Arc::clone(&harness.machine),
        RunnerSettings::from(&config),
        CancellationToken::new(),
    );
    let mut source = ScriptedReadiness::new(vec![ready()]).repeat_last();
    let intent = video_intent().with_duration_secs(Some(0));

    let summary = tokio::time::timeout(
        Duration::from_secs(2),
        runner.run(intent, &mut source, None),
    )
    .await
    .expect("requested duration should override the configured one")
    .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(harness.mock.request_count(OperationKind::StopCapture), 1);
    assert_eq!(harness.entries().await[0].detail["duration_secs"], 0);
}

#[tokio::test]
async fn test_runner_feed_failure_stop_reason() {
    let harness = create_harness(create_test_config()).await;
    let runner = SessionRunner::new(
        Arc::clone(&harness.machine),
        RunnerSettings::from(&create_test_config()),
        CancellationToken::new(),
    );
    let mut source = JsonLinesReadiness::new(&b"not json\n"[..]);

    let summary = runner.run(video_intent(), &mut source, None).await.unwrap();

    assert!(matches!(summary.outcome, RunOutcome::FeedFailed { .. }));
    assert_eq!(harness.machine.state().await, SessionState::Idle);
    let entries = harness.entries().await;
    let last = entries.last().unwrap();
    assert_eq!(last.event_kind, AuditEventKind::SessionStopped);
    assert_eq!(last.detail["reason"], "feed_failed");
}
