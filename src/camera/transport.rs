use super::commands::{EndpointDescriptor, EndpointTarget};
use crate::config::CameraConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, trace};

/// Raw failure of a single request, before retry and breaker handling
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("camera answered HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable camera response: {0}")]
    Decode(String),

    #[error("transfer interrupted: {0}")]
    Interrupted(String),

    /// Local filesystem failure while writing a download
    #[error("cannot write destination: {0}")]
    Destination(String),
}

impl TransportError {
    /// Failures caused by the camera link, as opposed to the local disk
    pub fn is_link_failure(&self) -> bool {
        !matches!(self, TransportError::Destination(_))
    }
}

/// Successful camera answer; empty bodies decode as `null`
#[derive(Debug, Clone, PartialEq)]
pub struct CameraResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl CameraResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }
}

/// Request seam between the resilient client and the camera
#[async_trait]
pub trait CameraTransport: Send + Sync {
    async fn execute(&self, endpoint: &EndpointDescriptor) -> Result<CameraResponse, TransportError>;

    /// Stream the endpoint body into `destination`, returning the bytes written
    async fn download(
        &self,
        endpoint: &EndpointDescriptor,
        destination: &Path,
    ) -> Result<u64, TransportError>;
}

/// reqwest-backed transport talking to a real camera
pub struct HttpTransport {
    client: Client,
    control_base: String,
    media_base: String,
}

impl HttpTransport {
    pub fn new(config: &CameraConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Connect(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            control_base: config.base_url.trim_end_matches('/').to_string(),
            media_base: config.media_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, endpoint: &EndpointDescriptor) -> String {
        let base = match endpoint.target {
            EndpointTarget::Control => &self.control_base,
            EndpointTarget::Media => &self.media_base,
        };
        format!("{}{}", base, endpoint.path)
    }

    async fn send(&self, endpoint: &EndpointDescriptor) -> Result<reqwest::Response, TransportError> {
        let url = self.url_for(endpoint);
        trace!("Sending {} {}", endpoint.method, url);

        let response = self
            .client
            .request(endpoint.method.clone(), &url)
            .query(&endpoint.query)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl CameraTransport for HttpTransport {
    async fn execute(&self, endpoint: &EndpointDescriptor) -> Result<CameraResponse, TransportError> {
        let response = self.send(endpoint).await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(classify_reqwest_error)?;

        let body = if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))?
        };

        debug!("{} answered HTTP {}", endpoint.path, status);
        Ok(CameraResponse { status, body })
    }

    async fn download(
        &self,
        endpoint: &EndpointDescriptor,
        destination: &Path,
    ) -> Result<u64, TransportError> {
        let response = self.send(endpoint).await?;

        let file = File::create(destination)
            .await
            .map_err(|e| TransportError::Destination(format!("{}: {}", destination.display(), e)))?;
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::Interrupted(e.to_string()))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| TransportError::Destination(e.to_string()))?;
            written += chunk.len() as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| TransportError::Destination(e.to_string()))?;

        debug!("Downloaded {} bytes to {}", written, destination.display());
        Ok(written)
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(Duration::ZERO)
    } else if error.is_decode() {
        TransportError::Decode(error.to_string())
    } else if error.is_body() {
        TransportError::Interrupted(error.to_string())
    } else {
        TransportError::Connect(error.to_string())
    }
}
