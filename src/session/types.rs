use crate::camera::CameraMode;
use crate::config::ReadinessConfig;
use crate::error::{CameraError, SessionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Lifecycle of an auto-vlogger session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Guiding,
    ReadyToShoot,
    Capturing,
    Reviewing,
}

impl SessionState {
    pub const ALL: [SessionState; 5] = [
        SessionState::Idle,
        SessionState::Guiding,
        SessionState::ReadyToShoot,
        SessionState::Capturing,
        SessionState::Reviewing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::Guiding => "GUIDING",
            SessionState::ReadyToShoot => "READY_TO_SHOOT",
            SessionState::Capturing => "CAPTURING",
            SessionState::Reviewing => "REVIEWING",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// What the user wants to shoot; immutable once accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraIntent {
    pub objective: String,
    pub mode: CameraMode,
    /// Requested capture length, overriding the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

impl CameraIntent {
    pub fn new<S: Into<String>>(objective: S, mode: CameraMode) -> Self {
        Self {
            objective: objective.into(),
            mode,
            duration_secs: None,
        }
    }

    pub fn with_duration_secs(mut self, duration_secs: Option<u64>) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    /// Build an intent from untrusted text, rejecting unknown modes
    pub fn parse(objective: &str, mode: &str) -> Result<Self, CameraError> {
        let mode = mode.parse::<CameraMode>()?;
        Ok(Self::new(objective.trim(), mode))
    }
}

/// One readiness sample, every component in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadinessScore {
    pub framing: f64,
    pub lighting: f64,
    pub motion: f64,
}

impl ReadinessScore {
    pub fn new(framing: f64, lighting: f64, motion: f64) -> Result<Self, SessionError> {
        let score = Self {
            framing,
            lighting,
            motion,
        };
        score.validate()?;
        Ok(score)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        for (name, value) in [
            ("framing", self.framing),
            ("lighting", self.lighting),
            ("motion", self.motion),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(SessionError::InvalidReadiness {
                    details: format!("{} must be within [0, 1], got {}", name, value),
                });
            }
        }
        Ok(())
    }
}

/// Scores a sample must exceed before capture is offered
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadinessThresholds {
    pub framing: f64,
    pub lighting: f64,
    pub motion: f64,
}

impl ReadinessThresholds {
    /// Every component must be strictly above its threshold
    pub fn passes(&self, score: &ReadinessScore) -> bool {
        score.framing > self.framing && score.lighting > self.lighting && score.motion > self.motion
    }
}

impl Default for ReadinessThresholds {
    fn default() -> Self {
        Self::from(&ReadinessConfig::default())
    }
}

impl From<&ReadinessConfig> for ReadinessThresholds {
    fn from(config: &ReadinessConfig) -> Self {
        Self {
            framing: config.framing,
            lighting: config.lighting,
            motion: config.motion,
        }
    }
}

/// The single active session
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub intent: CameraIntent,
    pub last_scores: Option<ReadinessScore>,
    #[serde(skip)]
    pub capture_started_at: Option<Instant>,
    pub captures: u32,
}

impl SessionRecord {
    pub(crate) fn new(intent: CameraIntent) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Idle,
            started_at: Utc::now(),
            intent,
            last_scores: None,
            capture_started_at: None,
            captures: 0,
        }
    }
}

/// Why a session is being stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    Completed,
    FeedExhausted,
    TickLimit,
    Cancelled,
    FeedFailed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Requested => "requested",
            StopReason::Completed => "completed",
            StopReason::FeedExhausted => "feed_exhausted",
            StopReason::TickLimit => "tick_limit",
            StopReason::Cancelled => "cancelled",
            StopReason::FeedFailed => "feed_failed",
        }
    }
}

/// Result of `stop_session`; stopping is idempotent and never an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The session was stopped from `from_state`
    Stopped {
        session_id: String,
        from_state: SessionState,
    },
    /// Nothing was running
    NoActiveSession,
    /// A different session is active and was left untouched
    NotActiveSession { active_session_id: String },
}
