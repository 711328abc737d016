use super::client::ResilientCameraClient;
use super::transport::{CameraTransport, HttpTransport};
use crate::config::GopilotConfig;
use crate::error::{GopilotError, Result};
use std::sync::Arc;
use tracing::info;

/// Builder for the resilient camera client
pub struct CameraClientBuilder {
    config: Option<GopilotConfig>,
    transport: Option<Arc<dyn CameraTransport>>,
}

impl CameraClientBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            transport: None,
        }
    }

    pub fn config(mut self, config: GopilotConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom transport instead of HTTP
    pub fn transport(mut self, transport: Arc<dyn CameraTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<ResilientCameraClient> {
        let config = self
            .config
            .ok_or_else(|| GopilotError::system("Camera configuration must be specified"))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let http = HttpTransport::new(&config.camera).map_err(|e| {
                    GopilotError::system(format!("Failed to create camera transport: {}", e))
                })?;
                info!(
                    "Camera client targeting {} (media {})",
                    config.camera.base_url, config.camera.media_base_url
                );
                Arc::new(http)
            }
        };

        Ok(ResilientCameraClient::new(transport, &config))
    }
}

impl Default for CameraClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
