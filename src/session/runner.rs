use super::machine::SessionStateMachine;
use super::readiness::ReadinessSource;
use super::types::{CameraIntent, SessionState, StopOutcome, StopReason};
use crate::config::GopilotConfig;
use crate::error::{GopilotError, Result, SessionError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Commands from interactive control sources (keyboard, CLI)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Confirm,
    StopCapture,
    StopSession,
}

/// How a session run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Reached REVIEWING and was closed
    Completed,
    FeedExhausted,
    TickLimit,
    Cancelled,
    StoppedByUser,
    /// A camera failure ended the session
    Fatal { error: String },
    /// The readiness feed failed
    FeedFailed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub final_state: SessionState,
    pub ticks: u64,
    pub captures: u32,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub poll_interval: Duration,
    pub auto_confirm: bool,
    pub capture_duration: Duration,
    /// 0 = unlimited
    pub max_ticks: u64,
}

impl From<&GopilotConfig> for RunnerSettings {
    fn from(config: &GopilotConfig) -> Self {
        Self {
            poll_interval: config.readiness.poll_interval(),
            auto_confirm: config.session.auto_confirm,
            capture_duration: config.session.capture_duration(),
            max_ticks: config.readiness.max_ticks,
        }
    }
}

/// Polling loop feeding readiness samples into the state machine
pub struct SessionRunner {
    machine: Arc<SessionStateMachine>,
    settings: RunnerSettings,
    cancellation_token: CancellationToken,
}

impl SessionRunner {
    pub fn new(
        machine: Arc<SessionStateMachine>,
        settings: RunnerSettings,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            machine,
            settings,
            cancellation_token,
        }
    }

    /// Run one session to completion
    ///
    /// Errors from `start_session` are returned as is. Once the session is
    /// running every ending is reported through the summary.
    pub async fn run(
        &self,
        intent: CameraIntent,
        source: &mut dyn ReadinessSource,
        mut controls: Option<mpsc::Receiver<ControlCommand>>,
    ) -> Result<SessionSummary> {
        let capture_duration = intent
            .duration_secs
            .map(Duration::from_secs)
            .unwrap_or(self.settings.capture_duration);
        let session_id = self.machine.start_session(intent).await?;

        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0u64;
        let mut captures = 0u32;

        let outcome = loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    info!("Session {} cancelled", session_id);
                    break RunOutcome::Cancelled;
                }
                command = next_control(&mut controls) => {
                    debug!("Control command: {:?}", command);
                    let result = match command {
                        ControlCommand::Confirm => self.machine.confirm().await,
                        ControlCommand::StopCapture => self.machine.stop_capture().await,
                        ControlCommand::StopSession => break RunOutcome::StoppedByUser,
                    };
                    if command == ControlCommand::Confirm && result.is_ok() {
                        captures += 1;
                    }
                    if let Some(outcome) = self.absorb(result).await {
                        break outcome;
                    }
                }
                _ = ticker.tick() => {
                    match self.machine.state().await {
                        SessionState::Reviewing => break RunOutcome::Completed,
                        SessionState::Idle => {
                            // Stopped from elsewhere (signal handler, keyboard)
                            break RunOutcome::StoppedByUser;
                        }
                        SessionState::Guiding => {
                            ticks += 1;
                            let score = match source.next_score().await {
                                Ok(Some(score)) => score,
                                Ok(None) => break RunOutcome::FeedExhausted,
                                Err(e) => {
                                    warn!("Readiness feed failed: {}", e);
                                    break RunOutcome::FeedFailed { error: e.to_string() };
                                }
                            };
                            let result = self.machine.tick(score).await;
                            if let Some(outcome) = self.absorb(result).await {
                                break outcome;
                            }
                        }
                        SessionState::ReadyToShoot => {
                            ticks += 1;
                            if self.settings.auto_confirm {
                                let result = self.machine.confirm().await;
                                if result.is_ok() {
                                    captures += 1;
                                }
                                if let Some(outcome) = self.absorb(result).await {
                                    break outcome;
                                }
                            }
                        }
                        SessionState::Capturing => {
                            ticks += 1;
                            let elapsed = self
                                .machine
                                .snapshot()
                                .await
                                .and_then(|record| record.capture_started_at)
                                .map(|started| started.elapsed())
                                .unwrap_or_default();
                            if elapsed >= capture_duration {
                                let result = self.machine.stop_capture().await;
                                if let Some(outcome) = self.absorb(result).await {
                                    break outcome;
                                }
                            }
                        }
                    }

                    if self.settings.max_ticks > 0 && ticks >= self.settings.max_ticks {
                        info!("Session {} reached tick limit {}", session_id, ticks);
                        break RunOutcome::TickLimit;
                    }
                }
            }
        };

        let stop_reason = match &outcome {
            RunOutcome::Completed => StopReason::Completed,
            RunOutcome::FeedExhausted => StopReason::FeedExhausted,
            RunOutcome::TickLimit => StopReason::TickLimit,
            RunOutcome::Cancelled => StopReason::Cancelled,
            RunOutcome::StoppedByUser => StopReason::Requested,
            RunOutcome::FeedFailed { .. } => StopReason::FeedFailed,
            // The machine already closed the session
            RunOutcome::Fatal { .. } => {
                return Ok(self.summary(session_id, ticks, captures, outcome));
            }
        };

        match self
            .machine
            .stop_session_with_reason(Some(&session_id), stop_reason)
            .await?
        {
            StopOutcome::Stopped { from_state, .. } => Ok(SessionSummary {
                session_id,
                final_state: from_state,
                ticks,
                captures,
                outcome,
            }),
            // Already stopped by another control source
            StopOutcome::NoActiveSession | StopOutcome::NotActiveSession { .. } => {
                Ok(self.summary(session_id, ticks, captures, outcome))
            }
        }
    }

    /// Swallow recoverable errors; report an outcome once the session is gone
    async fn absorb<T>(&self, result: Result<T>) -> Option<RunOutcome> {
        match result {
            Ok(_) => None,
            Err(GopilotError::Session(
                e @ (SessionError::InvalidTransition { .. } | SessionError::NoActiveSession),
            )) => {
                debug!("Ignoring control action: {}", e);
                None
            }
            Err(e) => {
                if self.machine.state().await == SessionState::Idle {
                    Some(RunOutcome::Fatal {
                        error: e.to_string(),
                    })
                } else {
                    warn!("Session continues after error: {}", e);
                    None
                }
            }
        }
    }

    fn summary(
        &self,
        session_id: String,
        ticks: u64,
        captures: u32,
        outcome: RunOutcome,
    ) -> SessionSummary {
        SessionSummary {
            session_id,
            final_state: SessionState::Idle,
            ticks,
            captures,
            outcome,
        }
    }
}

/// Next command, or pending forever without a (live) control channel
async fn next_control(controls: &mut Option<mpsc::Receiver<ControlCommand>>) -> ControlCommand {
    if let Some(receiver) = controls.as_mut() {
        if let Some(command) = receiver.recv().await {
            return command;
        }
        *controls = None;
    }
    std::future::pending().await
}
