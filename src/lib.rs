pub mod app;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod infrastructure;
pub mod keyboard_input;
pub mod planner;
pub mod recovery;
pub mod session;

pub use app::{ComponentState, ShutdownReason, VloggerOrchestrator};
pub use camera::{
    CameraClientBuilder, CameraMode, CameraTransport, CircuitState, CommandMap, HttpTransport,
    MockTransport, ResilientCameraClient,
};
pub use config::{GopilotConfig, ProfileConfig, StopFailurePolicy};
pub use error::{CameraError, EventBusError, GopilotError, Result, SessionError};
pub use events::EventBus;
pub use infrastructure::{AuditEntry, AuditEventKind, AuditLog, AuditReader};
pub use keyboard_input::KeyboardInputHandler;
pub use planner::{IntentPlanner, KeywordPlanner};
pub use recovery::{RecoveryAction, RetryPolicy};
pub use session::{
    CameraIntent, ReadinessScore, ReadinessSource, SessionRunner, SessionState,
    SessionStateMachine, SessionSummary,
};
