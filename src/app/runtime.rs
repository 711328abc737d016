use super::{ComponentState, ShutdownReason, VloggerOrchestrator};
use crate::camera::CameraMode;
use crate::error::Result;
use crate::keyboard_input::KeyboardInputHandler;
use crate::session::{ReadinessSource, RunnerSettings, SessionRunner, SessionSummary};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

impl VloggerOrchestrator {
    /// Plan the prompt and run one session with signal handling
    pub async fn run_session(
        &mut self,
        prompt: &str,
        mode: Option<CameraMode>,
        source: &mut dyn ReadinessSource,
    ) -> Result<SessionSummary> {
        let intent = self.planner.plan(prompt, mode).await?;
        info!(
            "Running session: '{}' ({})",
            intent.objective, intent.mode
        );

        self.setup_signal_handlers();

        let controls = if self.keyboard_enabled {
            let (sender, receiver) = mpsc::channel(8);
            let handler = KeyboardInputHandler::new(sender);
            self.set_component_state("keyboard", ComponentState::Starting)
                .await;
            handler.start().await?;
            self.keyboard_handler = Some(handler);
            self.set_component_state("keyboard", ComponentState::Running)
                .await;
            Some(receiver)
        } else {
            None
        };

        let runner = SessionRunner::new(
            Arc::clone(&self.machine),
            RunnerSettings::from(&self.config),
            self.cancellation_token.clone(),
        );

        self.set_component_state("session", ComponentState::Running)
            .await;
        let result = runner.run(intent, source, controls).await;

        {
            let mut reason = self.shutdown_reason.lock().await;
            if reason.is_none() {
                *reason = Some(match &result {
                    Ok(_) => ShutdownReason::SessionEnded,
                    Err(e) => ShutdownReason::Error(e.to_string()),
                });
            }
        }
        let state = if result.is_ok() {
            ComponentState::Stopped
        } else {
            ComponentState::Failed
        };
        self.set_component_state("session", state).await;

        result
    }

    /// Cancel the running session on SIGINT/SIGTERM
    fn setup_signal_handlers(&self) {
        // Handle SIGTERM - Unix only
        #[cfg(unix)]
        {
            let token = self.cancellation_token.clone();
            let reason = Arc::clone(&self.shutdown_reason);
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                tokio::select! {
                    _ = token.cancelled() => {}
                    Some(()) = sigterm.recv() => {
                        info!("Received SIGTERM signal");
                        request_shutdown(&token, &reason, "SIGTERM").await;
                    }
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let token = self.cancellation_token.clone();
        let reason = Arc::clone(&self.shutdown_reason);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                Ok(()) = signal::ctrl_c() => {
                    info!("Received SIGINT signal (Ctrl+C)");
                    request_shutdown(&token, &reason, "SIGINT").await;
                }
            }
        });
    }
}

async fn request_shutdown(
    token: &CancellationToken,
    reason: &Mutex<Option<ShutdownReason>>,
    signal_name: &str,
) {
    reason
        .lock()
        .await
        .get_or_insert(ShutdownReason::Signal(signal_name.to_string()));
    token.cancel();
}
