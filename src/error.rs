use crate::session::SessionState;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GopilotError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Audit log error: {details}")]
    Audit { details: String },

    #[error("System error: {message}")]
    System { message: String },
}

/// Failures surfaced by the resilient camera client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("{operation} failed after {attempts} attempt(s): {details}")]
    Transient {
        operation: String,
        attempts: u32,
        details: String,
    },

    #[error("Circuit breaker is open, retry in {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("Invalid parameter '{name}': {details}")]
    InvalidParameter { name: String, details: String },

    #[error("Download of {media_id} failed: {details}")]
    Download { media_id: String, details: String },

    #[error("Unknown camera operation: {operation}")]
    UnknownOperation { operation: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session {session_id} is already active")]
    AlreadyActive { session_id: String },

    #[error("No active session")]
    NoActiveSession,

    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },

    #[error("Invalid readiness score: {details}")]
    InvalidReadiness { details: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },
}

impl CameraError {
    pub fn invalid_parameter<N: Into<String>, D: Into<String>>(name: N, details: D) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            details: details.into(),
        }
    }

    /// Whether the retry policy may attempt the operation again
    pub fn is_retryable(&self) -> bool {
        matches!(self, CameraError::Transient { .. })
    }

    /// Stable name used in audit details
    pub fn kind(&self) -> &'static str {
        match self {
            CameraError::Transient { .. } => "transient",
            CameraError::CircuitOpen { .. } => "circuit_open",
            CameraError::InvalidParameter { .. } => "invalid_parameter",
            CameraError::Download { .. } => "download",
            CameraError::UnknownOperation { .. } => "unknown_operation",
        }
    }
}

impl GopilotError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn audit<S: Into<String>>(details: S) -> Self {
        Self::Audit {
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GopilotError>;

pub type CameraResult<T> = std::result::Result<T, CameraError>;
