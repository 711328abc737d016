use super::{ComponentState, VloggerOrchestrator};
use crate::error::{GopilotError, Result};
use tracing::{error, info, warn};

impl VloggerOrchestrator {
    /// Check the camera link and apply an optional profile before a session
    pub async fn start(&mut self, profile: Option<&str>) -> Result<()> {
        info!("Starting auto-vlogger");

        self.set_component_state("camera", ComponentState::Starting)
            .await;
        match self.client.get_status().await {
            Ok(status) => {
                info!(
                    "Camera reachable: {} mode, {:?}, {} media files",
                    status.mode, status.capture_state, status.media_count
                );
            }
            // The session start will surface a dead link through the audit log
            Err(e) => warn!("Camera status check failed: {}", e),
        }

        if let Some(name) = profile {
            let profile = self
                .config
                .profile(name)
                .cloned()
                .ok_or_else(|| GopilotError::system(format!("Unknown profile '{}'", name)))?;

            if let Err(e) = self.client.apply_profile(&profile).await {
                error!("Failed to apply profile '{}': {}", name, e);
                self.set_component_state("camera", ComponentState::Failed)
                    .await;
                return Err(e.into());
            }
            info!("Profile '{}' applied", name);
        }
        self.set_component_state("camera", ComponentState::Running)
            .await;

        if self.keyboard_enabled {
            self.set_component_state("keyboard", ComponentState::Stopped)
                .await;
        }

        Ok(())
    }
}
