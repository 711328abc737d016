use super::{ComponentState, ShutdownReason, VloggerOrchestrator};
use crate::error::{GopilotError, Result};
use crate::session::{StopOutcome, StopReason};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl VloggerOrchestrator {
    /// Stop keyboard controls and close any session left running
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");
        if let Some(reason) = self.shutdown_reason().await {
            info!("Shutdown reason: {:?}", reason);
        }

        // Cancel the runner and signal handlers
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        if self.keyboard_enabled {
            if let Err(e) = self.stop_component("keyboard").await {
                error!("Error stopping keyboard: {}", e);
                exit_code = 1;
            }
        }

        if let Err(e) = self.stop_component("session").await {
            error!("Error stopping session: {}", e);
            exit_code = 1;
        }

        if matches!(self.shutdown_reason().await, Some(ShutdownReason::Error(_))) {
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_component(&mut self, component: &str) -> Result<()> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        let result = match component {
            "keyboard" => match self.keyboard_handler.take() {
                Some(handler) => timeout(STOP_TIMEOUT, handler.stop()).await,
                None => Ok(Ok(())),
            },
            "session" => {
                let machine = self.machine();
                timeout(STOP_TIMEOUT, async move {
                    match machine
                        .stop_session_with_reason(None, StopReason::Cancelled)
                        .await?
                    {
                        StopOutcome::Stopped { session_id, from_state } => {
                            warn!("Session {} was still {} at shutdown", session_id, from_state);
                        }
                        StopOutcome::NoActiveSession | StopOutcome::NotActiveSession { .. } => {}
                    }
                    Ok::<(), GopilotError>(())
                })
                .await
            }
            other => {
                return Err(GopilotError::system(format!("Unknown component '{}'", other)));
            }
        };

        match result {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("Error stopping {} component: {}", component, e);
                Err(e)
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("{} component stop timeout", component);
                Err(GopilotError::system(format!(
                    "{} component stop timeout",
                    component
                )))
            }
        }
    }
}
