use super::commands::{EndpointDescriptor, EndpointTarget, OperationKind};
use super::transport::{CameraResponse, CameraTransport, TransportError};
use super::types::CameraMode;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// In-memory Hero7 camera for testing and dry runs without hardware
///
/// Answers with the same JSON layouts as the real control API and lets tests
/// inject failures and latency per request.
pub struct MockTransport {
    camera: Mutex<MockCamera>,
}

struct MockCamera {
    mode: CameraMode,
    capturing: bool,
    settings: BTreeMap<u32, u32>,
    media: Vec<MockMedia>,
    next_file: u32,
    failures: VecDeque<ScriptedFailure>,
    offline: bool,
    latency: Duration,
    requests: Vec<(OperationKind, EndpointDescriptor)>,
}

struct ScriptedFailure {
    only: Option<OperationKind>,
    error: TransportError,
}

#[derive(Clone)]
struct MockMedia {
    directory: String,
    filename: String,
    size_bytes: u64,
    created: i64,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a camera in video mode with an empty card
    pub fn new() -> Self {
        Self {
            camera: Mutex::new(MockCamera {
                mode: CameraMode::Video,
                capturing: false,
                settings: BTreeMap::new(),
                media: Vec::new(),
                next_file: 1,
                failures: VecDeque::new(),
                offline: false,
                latency: Duration::ZERO,
                requests: Vec::new(),
            }),
        }
    }

    /// Add a file to the simulated SD card
    pub fn add_media(&self, directory: &str, filename: &str, size_bytes: u64) {
        let mut camera = self.camera.lock();
        let created = 1_700_000_000 + camera.media.len() as i64;
        camera.media.push(MockMedia {
            directory: directory.to_string(),
            filename: filename.to_string(),
            size_bytes,
            created,
        });
    }

    /// Fail the next `count` requests, whatever they are
    pub fn fail_next(&self, count: usize, error: TransportError) {
        let mut camera = self.camera.lock();
        for _ in 0..count {
            camera.failures.push_back(ScriptedFailure {
                only: None,
                error: error.clone(),
            });
        }
    }

    /// Fail the next `count` requests of one operation
    pub fn fail_operation(&self, kind: OperationKind, count: usize, error: TransportError) {
        let mut camera = self.camera.lock();
        for _ in 0..count {
            camera.failures.push_back(ScriptedFailure {
                only: Some(kind),
                error: error.clone(),
            });
        }
    }

    /// Refuse every connection until brought back online
    pub fn set_offline(&self, offline: bool) {
        self.camera.lock().offline = offline;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.camera.lock().latency = latency;
    }

    pub fn mode(&self) -> CameraMode {
        self.camera.lock().mode
    }

    pub fn is_capturing(&self) -> bool {
        self.camera.lock().capturing
    }

    /// Every request that reached the camera, in order
    pub fn requests(&self) -> Vec<(OperationKind, EndpointDescriptor)> {
        self.camera.lock().requests.clone()
    }

    pub fn request_count(&self, kind: OperationKind) -> usize {
        self.camera
            .lock()
            .requests
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.camera.lock().requests.len()
    }

    async fn simulate_latency(&self) {
        let latency = self.camera.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl MockCamera {
    fn admit(&mut self, endpoint: &EndpointDescriptor) -> Result<OperationKind, TransportError> {
        let kind = classify(endpoint)?;
        self.requests.push((kind, endpoint.clone()));

        if self.offline {
            return Err(TransportError::Connect("camera unreachable".to_string()));
        }

        let position = self
            .failures
            .iter()
            .position(|f| f.only.map_or(true, |only| only == kind));
        if let Some(index) = position {
            if let Some(failure) = self.failures.remove(index) {
                debug!("Mock camera failing {} with {}", kind, failure.error);
                return Err(failure.error);
            }
        }

        Ok(kind)
    }

    fn handle(&mut self, kind: OperationKind, endpoint: &EndpointDescriptor) -> Result<Value, TransportError> {
        match kind {
            OperationKind::GetStatus => {
                let settings: serde_json::Map<String, Value> = self
                    .settings
                    .iter()
                    .map(|(id, option)| (id.to_string(), json!(option)))
                    .collect();
                Ok(json!({
                    "status": {
                        "43": self.mode.hero7_value(),
                        "8": if self.capturing { 1 } else { 0 },
                    },
                    "settings": settings,
                }))
            }
            OperationKind::GetInfo => Ok(json!({ "info": { "media_count": self.media.len() } })),
            OperationKind::SetMode => {
                let value = query_value(endpoint, "p")?;
                self.mode = match value {
                    0 => CameraMode::Video,
                    1 => CameraMode::Photo,
                    2 => CameraMode::Timelapse,
                    other => return Err(bad_request(format!("unknown mode value {}", other))),
                };
                Ok(json!({}))
            }
            OperationKind::StartCapture => {
                self.capturing = true;
                Ok(json!({}))
            }
            OperationKind::StopCapture => {
                if self.capturing {
                    self.capturing = false;
                    let extension = if self.mode == CameraMode::Photo { "JPG" } else { "MP4" };
                    let filename = format!("GX01{:04}.{}", self.next_file, extension);
                    self.next_file += 1;
                    let created = 1_700_000_000 + self.media.len() as i64;
                    self.media.push(MockMedia {
                        directory: "100GOPRO".to_string(),
                        filename,
                        size_bytes: 4096,
                        created,
                    });
                }
                Ok(json!({}))
            }
            OperationKind::SetSetting => {
                let mut segments = endpoint.path.rsplit('/');
                let option = segments.next().and_then(|s| s.parse::<u32>().ok());
                let setting = segments.next().and_then(|s| s.parse::<u32>().ok());
                match (setting, option) {
                    (Some(setting), Some(option)) => {
                        self.settings.insert(setting, option);
                        Ok(json!({}))
                    }
                    _ => Err(bad_request(format!("malformed setting path {}", endpoint.path))),
                }
            }
            OperationKind::ListMedia => {
                let mut directories: BTreeMap<String, Vec<Value>> = BTreeMap::new();
                for item in &self.media {
                    directories.entry(item.directory.clone()).or_default().push(json!({
                        "n": item.filename,
                        "s": item.size_bytes.to_string(),
                        "cre": item.created.to_string(),
                    }));
                }
                let media: Vec<Value> = directories
                    .into_iter()
                    .map(|(d, fs)| json!({ "d": d, "fs": fs }))
                    .collect();
                Ok(json!({ "id": "mock", "media": media }))
            }
            OperationKind::DownloadMedia => Err(bad_request("downloads use the media server")),
        }
    }

    fn media_for(&self, endpoint: &EndpointDescriptor) -> Option<MockMedia> {
        self.media
            .iter()
            .find(|m| endpoint.path == format!("/videos/DCIM/{}/{}", m.directory, m.filename))
            .cloned()
    }
}

#[async_trait]
impl CameraTransport for MockTransport {
    async fn execute(&self, endpoint: &EndpointDescriptor) -> Result<CameraResponse, TransportError> {
        self.simulate_latency().await;

        let mut camera = self.camera.lock();
        let kind = camera.admit(endpoint)?;
        let body = camera.handle(kind, endpoint)?;
        Ok(CameraResponse::ok(body))
    }

    async fn download(
        &self,
        endpoint: &EndpointDescriptor,
        destination: &Path,
    ) -> Result<u64, TransportError> {
        self.simulate_latency().await;

        let media = {
            let mut camera = self.camera.lock();
            camera.admit(endpoint)?;
            camera.media_for(endpoint)
        };

        let media = media.ok_or_else(|| TransportError::Status {
            status: 404,
            body: format!("{} not found", endpoint.path),
        })?;

        let bytes = vec![0u8; media.size_bytes as usize];
        tokio::fs::write(destination, &bytes)
            .await
            .map_err(|e| TransportError::Destination(format!("{}: {}", destination.display(), e)))?;

        Ok(media.size_bytes)
    }
}

fn classify(endpoint: &EndpointDescriptor) -> Result<OperationKind, TransportError> {
    let path = endpoint.path.as_str();
    let kind = match (endpoint.target, path) {
        (EndpointTarget::Media, p) if p.starts_with("/videos/DCIM/") => OperationKind::DownloadMedia,
        (EndpointTarget::Control, "/gp/gpControl/status") => OperationKind::GetStatus,
        (EndpointTarget::Control, "/gp/gpControl/info") => OperationKind::GetInfo,
        (EndpointTarget::Control, "/gp/gpControl/command/mode") => OperationKind::SetMode,
        (EndpointTarget::Control, "/gp/gpControl/command/shutter") => {
            if query_value(endpoint, "p")? == 1 {
                OperationKind::StartCapture
            } else {
                OperationKind::StopCapture
            }
        }
        (EndpointTarget::Control, p) if p.starts_with("/gp/gpControl/setting/") => {
            OperationKind::SetSetting
        }
        (EndpointTarget::Control, "/gp/gpMediaList") => OperationKind::ListMedia,
        _ => {
            return Err(TransportError::Status {
                status: 404,
                body: format!("no route for {}", path),
            })
        }
    };
    Ok(kind)
}

fn query_value(endpoint: &EndpointDescriptor, key: &str) -> Result<u32, TransportError> {
    endpoint
        .query
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
        .ok_or_else(|| bad_request(format!("missing query parameter {}", key)))
}

fn bad_request(body: impl Into<String>) -> TransportError {
    TransportError::Status {
        status: 400,
        body: body.into(),
    }
}
