mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use orchestrator::VloggerOrchestrator;
pub use types::{ComponentState, ShutdownReason};
