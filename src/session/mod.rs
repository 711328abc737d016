mod machine;
mod readiness;
mod runner;
mod types;
#[cfg(test)]
mod tests;

pub use machine::SessionStateMachine;
pub use readiness::{JsonLinesReadiness, ReadinessSource, ScriptedReadiness};
pub use runner::{ControlCommand, RunOutcome, RunnerSettings, SessionRunner, SessionSummary};
pub use types::{
    CameraIntent, ReadinessScore, ReadinessThresholds, SessionRecord, SessionState, StopOutcome,
    StopReason,
};
