use super::types::{
    CameraIntent, ReadinessScore, ReadinessThresholds, SessionRecord, SessionState, StopOutcome,
    StopReason,
};
use crate::camera::{CircuitStatus, ResilientCameraClient};
use crate::config::StopFailurePolicy;
use crate::error::{CameraError, GopilotError, Result, SessionError};
use crate::events::EventBus;
use crate::infrastructure::{AuditEntry, AuditEventKind, AuditLog};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Id of the session that owns the slot, set before the first camera call
type Claim = parking_lot::Mutex<Option<String>>;

/// Clears an uncommitted start claim, including when the start is dropped
struct StartClaim<'a> {
    claim: &'a Claim,
    committed: bool,
}

impl Drop for StartClaim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            *self.claim.lock() = None;
        }
    }
}

/// Drives one auto-vlogger session through
/// `IDLE -> GUIDING -> READY_TO_SHOOT -> CAPTURING -> REVIEWING -> IDLE`.
///
/// The active record lives in a single slot. The slot lock is held across
/// the camera call and the audit append of a transition, so camera commands
/// for a session are strictly sequential and audit entries land in
/// transition order. A start claims the session id before touching the
/// camera; any other start seen meanwhile is rejected, never queued.
pub struct SessionStateMachine {
    slot: Mutex<Option<SessionRecord>>,
    claim: Claim,
    client: Arc<ResilientCameraClient>,
    audit: Arc<AuditLog>,
    events: Option<EventBus>,
    thresholds: ReadinessThresholds,
    stop_policy: StopFailurePolicy,
}

impl SessionStateMachine {
    pub fn new(
        client: Arc<ResilientCameraClient>,
        audit: Arc<AuditLog>,
        thresholds: ReadinessThresholds,
        stop_policy: StopFailurePolicy,
    ) -> Self {
        Self {
            slot: Mutex::new(None),
            claim: parking_lot::Mutex::new(None),
            client,
            audit,
            events: None,
            thresholds,
            stop_policy,
        }
    }

    /// Publish every appended entry on `events`
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn state(&self) -> SessionState {
        self.slot
            .lock()
            .await
            .as_ref()
            .map_or(SessionState::Idle, |record| record.state)
    }

    pub async fn active_session_id(&self) -> Option<String> {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|record| record.session_id.clone())
    }

    /// Copy of the active record
    pub async fn snapshot(&self) -> Option<SessionRecord> {
        self.slot.lock().await.clone()
    }

    pub fn client(&self) -> &ResilientCameraClient {
        &self.client
    }

    /// `IDLE -> GUIDING`: create the session and switch the camera mode
    pub async fn start_session(&self, intent: CameraIntent) -> Result<String> {
        let mut record = SessionRecord::new(intent);
        let session_id = record.session_id.clone();

        let mut claim = {
            let mut owner = self.claim.lock();
            if let Some(active) = owner.as_ref() {
                return Err(SessionError::AlreadyActive {
                    session_id: active.clone(),
                }
                .into());
            }
            *owner = Some(session_id.clone());
            StartClaim {
                claim: &self.claim,
                committed: false,
            }
        };

        // Terminal transitions release the claim only while holding the slot,
        // so the slot is empty once acquired here
        let mut slot = self.slot.lock().await;

        if let Err(e) = self.client.set_mode(record.intent.mode).await {
            error!("Session {} aborted: set_mode failed: {}", session_id, e);
            self.record(AuditEntry::new(
                &session_id,
                AuditEventKind::SessionAborted,
                SessionState::Idle,
                SessionState::Idle,
                self.failure_detail(&e, json!({ "mode": record.intent.mode })),
            ))
            .await?;
            return Err(e.into());
        }

        record.state = SessionState::Guiding;
        let detail = json!({
            "objective": record.intent.objective,
            "mode": record.intent.mode,
            "duration_secs": record.intent.duration_secs,
        });
        *slot = Some(record);
        claim.committed = true;

        info!("Session {} started", session_id);
        self.record(AuditEntry::new(
            &session_id,
            AuditEventKind::SessionStarted,
            SessionState::Idle,
            SessionState::Guiding,
            detail,
        ))
        .await?;

        Ok(session_id)
    }

    /// Feed one readiness sample; transitions only `GUIDING -> READY_TO_SHOOT`
    pub async fn tick(&self, score: ReadinessScore) -> Result<SessionState> {
        score.validate()?;

        let mut slot = self.slot.lock().await;
        let Some(record) = slot.as_mut() else {
            return Ok(SessionState::Idle);
        };
        if record.state != SessionState::Guiding {
            return Ok(record.state);
        }

        record.last_scores = Some(score);
        if !self.thresholds.passes(&score) {
            debug!(
                "Session {} not ready: framing {:.2} lighting {:.2} motion {:.2}",
                record.session_id, score.framing, score.lighting, score.motion
            );
            return Ok(SessionState::Guiding);
        }

        record.state = SessionState::ReadyToShoot;
        let session_id = record.session_id.clone();

        info!("Session {} ready to shoot", session_id);
        self.record(AuditEntry::new(
            &session_id,
            AuditEventKind::ReadyToShoot,
            SessionState::Guiding,
            SessionState::ReadyToShoot,
            json!({ "scores": score }),
        ))
        .await?;

        Ok(SessionState::ReadyToShoot)
    }

    /// `READY_TO_SHOOT -> CAPTURING`: issue `start_capture` exactly once
    pub async fn confirm(&self) -> Result<SessionState> {
        let mut slot = self.slot.lock().await;
        let record = Self::require_state(&mut slot, SessionState::ReadyToShoot, "confirm")?;
        let session_id = record.session_id.clone();

        match self.client.start_capture().await {
            Ok(()) => {
                record.state = SessionState::Capturing;
                record.capture_started_at = Some(Instant::now());
                record.captures += 1;
                let capture = record.captures;

                info!("Session {} capturing", session_id);
                self.record(AuditEntry::new(
                    &session_id,
                    AuditEventKind::CaptureStarted,
                    SessionState::ReadyToShoot,
                    SessionState::Capturing,
                    json!({ "capture": capture }),
                ))
                .await?;
                Ok(SessionState::Capturing)
            }
            Err(e) if self.is_fatal(&e) => {
                self.release(&mut slot);
                self.fail_session(&session_id, SessionState::ReadyToShoot, "start_capture", e)
                    .await
            }
            Err(e) => {
                record.state = SessionState::Guiding;

                warn!(
                    "Session {} capture start failed, back to guiding: {}",
                    session_id, e
                );
                self.record(AuditEntry::new(
                    &session_id,
                    AuditEventKind::CaptureStartFailed,
                    SessionState::ReadyToShoot,
                    SessionState::Guiding,
                    self.failure_detail(&e, json!({})),
                ))
                .await?;
                Err(e.into())
            }
        }
    }

    /// `CAPTURING -> REVIEWING`: issue `stop_capture`
    pub async fn stop_capture(&self) -> Result<SessionState> {
        let mut slot = self.slot.lock().await;
        let record = Self::require_state(&mut slot, SessionState::Capturing, "stop capture")?;
        let session_id = record.session_id.clone();
        let captured_for_ms = record
            .capture_started_at
            .map(|started| started.elapsed().as_millis() as u64);

        match self.client.stop_capture().await {
            Ok(()) => {
                record.state = SessionState::Reviewing;

                info!("Session {} capture stopped, reviewing", session_id);
                self.record(AuditEntry::new(
                    &session_id,
                    AuditEventKind::CaptureStopped,
                    SessionState::Capturing,
                    SessionState::Reviewing,
                    json!({ "captured_for_ms": captured_for_ms }),
                ))
                .await?;
                Ok(SessionState::Reviewing)
            }
            Err(e) if self.is_fatal(&e) || self.stop_policy == StopFailurePolicy::Escalate => {
                self.release(&mut slot);
                self.fail_session(&session_id, SessionState::Capturing, "stop_capture", e)
                    .await
            }
            Err(e) => {
                record.state = SessionState::Reviewing;

                warn!(
                    "Session {} capture stop failed, continuing to review: {}",
                    session_id, e
                );
                self.record(AuditEntry::new(
                    &session_id,
                    AuditEventKind::CaptureStopAnomaly,
                    SessionState::Capturing,
                    SessionState::Reviewing,
                    self.failure_detail(&e, json!({ "captured_for_ms": captured_for_ms })),
                ))
                .await?;
                Ok(SessionState::Reviewing)
            }
        }
    }

    /// Any state `-> IDLE`; idempotent
    pub async fn stop_session(&self, session_id: Option<&str>) -> Result<StopOutcome> {
        self.stop_session_with_reason(session_id, StopReason::Requested)
            .await
    }

    pub async fn stop_session_with_reason(
        &self,
        session_id: Option<&str>,
        reason: StopReason,
    ) -> Result<StopOutcome> {
        let mut slot = self.slot.lock().await;
        let Some(record) = slot.as_ref() else {
            debug!("stop_session with no active session");
            return Ok(StopOutcome::NoActiveSession);
        };

        if let Some(requested) = session_id {
            if requested != record.session_id {
                return Ok(StopOutcome::NotActiveSession {
                    active_session_id: record.session_id.clone(),
                });
            }
        }

        let from_state = record.state;
        let active_id = record.session_id.clone();
        let mut detail = json!({ "reason": reason, "captures": record.captures });

        if from_state == SessionState::Capturing {
            let stop_result = match self.client.stop_capture().await {
                Ok(()) => Value::from("ok"),
                Err(e) => {
                    warn!(
                        "Session {} best-effort stop_capture failed: {}",
                        active_id, e
                    );
                    Value::from(e.to_string())
                }
            };
            detail["stop_capture"] = stop_result;
        }

        self.release(&mut slot);

        info!(
            "Session {} stopped from {} ({})",
            active_id,
            from_state,
            reason.as_str()
        );
        self.record(AuditEntry::new(
            &active_id,
            AuditEventKind::SessionStopped,
            from_state,
            SessionState::Idle,
            detail,
        ))
        .await?;

        Ok(StopOutcome::Stopped {
            session_id: active_id,
            from_state,
        })
    }

    /// Empty the slot and give up the claim; callers still hold the slot lock
    fn release(&self, slot: &mut Option<SessionRecord>) {
        slot.take();
        *self.claim.lock() = None;
    }

    fn require_state<'a>(
        slot: &'a mut Option<SessionRecord>,
        expected: SessionState,
        action: &'static str,
    ) -> Result<&'a mut SessionRecord> {
        let record = slot.as_mut().ok_or(SessionError::NoActiveSession)?;
        if record.state != expected {
            return Err(SessionError::InvalidTransition {
                state: record.state,
                action,
            }
            .into());
        }
        Ok(record)
    }

    /// Breaker refusals, invalid input and failures that opened the breaker end the session
    fn is_fatal(&self, error: &CameraError) -> bool {
        matches!(
            error,
            CameraError::CircuitOpen { .. } | CameraError::InvalidParameter { .. }
        ) || self.client.circuit_status() == CircuitStatus::Open
    }

    async fn fail_session<T>(
        &self,
        session_id: &str,
        from_state: SessionState,
        operation: &str,
        error: CameraError,
    ) -> Result<T> {
        error!(
            "Session {} fatal during {}: {}",
            session_id, operation, error
        );
        self.record(AuditEntry::new(
            session_id,
            AuditEventKind::SessionFatal,
            from_state,
            SessionState::Idle,
            self.failure_detail(&error, json!({ "operation": operation })),
        ))
        .await?;
        Err(GopilotError::Camera(error))
    }

    fn failure_detail(&self, error: &CameraError, mut detail: Value) -> Value {
        detail["error"] = Value::from(error.to_string());
        detail["error_kind"] = Value::from(error.kind());
        detail["circuit"] = json!(self.client.circuit_status());
        detail
    }

    async fn record(&self, entry: AuditEntry) -> Result<()> {
        self.audit.append(&entry).await?;

        if let Some(events) = &self.events {
            if events.has_subscribers() {
                if let Err(e) = events.publish(entry).await {
                    debug!("Audit entry not delivered to observers: {}", e);
                }
            }
        }
        Ok(())
    }
}
