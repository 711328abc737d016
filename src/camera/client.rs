use super::breaker::{Admission, CircuitBreaker, CircuitState, CircuitStatus};
use super::commands::{CameraOperation, CommandMap};
use super::transport::{CameraTransport, TransportError};
use super::types::{
    CameraMode, CameraSetting, CameraStatus, CaptureState, DownloadReceipt, MediaItem, MediaPage,
};
use crate::config::{GopilotConfig, ProfileConfig};
use crate::error::{CameraError, CameraResult};
use crate::recovery::{RecoveryAction, RetryPolicy};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Camera client with per-call timeout, bounded retry and a circuit breaker
///
/// Every public operation is a single call with uniform failure semantics:
/// [`CameraError::CircuitOpen`] when the breaker refuses the call,
/// [`CameraError::Transient`] once the retry budget is spent,
/// [`CameraError::InvalidParameter`] for bad input (never sent), and
/// [`CameraError::Download`] for failed media transfers.
pub struct ResilientCameraClient {
    transport: Arc<dyn CameraTransport>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    request_timeout: Duration,
    download_timeout: Duration,
}

impl ResilientCameraClient {
    /// Client over any transport, with policies taken from configuration
    pub fn new(transport: Arc<dyn CameraTransport>, config: &GopilotConfig) -> Self {
        Self {
            transport,
            breaker: CircuitBreaker::new(&config.breaker),
            retry: RetryPolicy::from(&config.retry),
            request_timeout: config.camera.request_timeout(),
            download_timeout: config.camera.download_timeout(),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.snapshot()
    }

    pub fn circuit_status(&self) -> CircuitStatus {
        self.breaker.status()
    }

    pub async fn get_status(&self) -> CameraResult<CameraStatus> {
        let status = self.call(&CameraOperation::GetStatus).await?;
        let info = self.call(&CameraOperation::GetInfo).await?;

        let mode = status
            .pointer("/status/43")
            .and_then(as_u64)
            .map(CameraMode::from_hero7_value)
            .unwrap_or(CameraMode::Video);
        let capture_state = match status.pointer("/status/8").and_then(as_u64) {
            Some(1) => CaptureState::Capturing,
            _ => CaptureState::Idle,
        };
        let settings: BTreeMap<String, Value> = status
            .get("settings")
            .and_then(Value::as_object)
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let media_count = info
            .pointer("/info/media_count")
            .and_then(as_u64)
            .unwrap_or(0);

        Ok(CameraStatus {
            mode,
            capture_state,
            settings,
            media_count,
        })
    }

    pub async fn set_mode(&self, mode: CameraMode) -> CameraResult<()> {
        self.call(&CameraOperation::SetMode(mode)).await?;
        info!("Camera mode set to {}", mode);
        Ok(())
    }

    /// Parse and apply a mode given by name; unknown names never reach the camera
    pub async fn set_mode_named(&self, mode: &str) -> CameraResult<CameraMode> {
        let mode: CameraMode = mode.parse()?;
        self.set_mode(mode).await?;
        Ok(mode)
    }

    pub async fn start_capture(&self) -> CameraResult<()> {
        self.call(&CameraOperation::StartCapture).await?;
        info!("Shutter started");
        Ok(())
    }

    pub async fn stop_capture(&self) -> CameraResult<()> {
        self.call(&CameraOperation::StopCapture).await?;
        info!("Shutter stopped");
        Ok(())
    }

    pub async fn set_setting(
        &self,
        key: &str,
        option: u32,
    ) -> CameraResult<CameraSetting> {
        let setting = CameraSetting::from_key(key)?;
        self.call(&CameraOperation::SetSetting { setting, option })
            .await?;
        debug!("Setting {} set to option {}", setting, option);
        Ok(setting)
    }

    /// Switch mode, then apply each profile setting in key order
    pub async fn apply_profile(&self, profile: &ProfileConfig) -> CameraResult<()> {
        // Reject the whole profile before touching the camera
        let settings = profile
            .settings
            .iter()
            .map(|(key, option)| CameraSetting::from_key(key).map(|s| (s, *option)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.set_mode(profile.mode).await?;
        for (setting, option) in settings {
            self.call(&CameraOperation::SetSetting { setting, option })
                .await?;
        }
        Ok(())
    }

    /// One page of the media listing; `cursor` comes from a previous page
    pub async fn list_media(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> CameraResult<MediaPage> {
        if limit == 0 {
            return Err(CameraError::invalid_parameter("limit", "must be at least 1"));
        }
        let start = match cursor {
            None => 0,
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                CameraError::invalid_parameter("cursor", format!("'{}' is not a valid cursor", raw))
            })?,
        };

        let listing = self.call(&CameraOperation::ListMedia).await?;
        let all = parse_media_list(&listing);

        let end = start.saturating_add(limit).min(all.len());
        let items = all.get(start..end).map(<[MediaItem]>::to_vec).unwrap_or_default();
        let next_cursor = (end < all.len()).then(|| end.to_string());

        debug!(
            "Listed {} of {} media items (next cursor: {:?})",
            items.len(),
            all.len(),
            next_cursor
        );
        Ok(MediaPage { items, next_cursor })
    }

    /// Stream one media file to `destination`
    ///
    /// Downloads are not retried. A failed transfer may leave a truncated
    /// file behind; callers must download again.
    pub async fn download_media(
        &self,
        media_id: &str,
        destination: &Path,
    ) -> CameraResult<DownloadReceipt> {
        let operation = CameraOperation::download(media_id)?;
        let endpoint = CommandMap::resolve(&operation);

        let admission = self.breaker.admit(Instant::now());
        if let Admission::Rejected { retry_after } = admission {
            return Err(CameraError::CircuitOpen { retry_after });
        }
        let probe = self.breaker.guard(admission);

        let download_error = |details: String| CameraError::Download {
            media_id: media_id.to_string(),
            details,
        };

        match timeout(self.download_timeout, self.transport.download(&endpoint, destination)).await {
            Ok(Ok(bytes_written)) => {
                self.breaker.record_success();
                probe.disarm();
                info!(
                    "Downloaded {} ({} bytes) to {}",
                    media_id,
                    bytes_written,
                    destination.display()
                );
                Ok(DownloadReceipt {
                    media_id: media_id.to_string(),
                    destination: destination.to_path_buf(),
                    bytes_written,
                })
            }
            Ok(Err(error)) => {
                // Local failures say nothing about the link; the guard releases the probe
                if error.is_link_failure() {
                    self.breaker.record_failure(Instant::now());
                    probe.disarm();
                }
                warn!("Download of {} failed: {}", media_id, error);
                Err(download_error(error.to_string()))
            }
            Err(_) => {
                self.breaker.record_failure(Instant::now());
                probe.disarm();
                let error = TransportError::Timeout(self.download_timeout);
                warn!("Download of {} failed: {}", media_id, error);
                Err(download_error(error.to_string()))
            }
        }
    }

    /// Issue one operation through the breaker with bounded retries
    async fn call(&self, operation: &CameraOperation) -> CameraResult<Value> {
        let endpoint = CommandMap::resolve(operation);
        let name = operation.kind().as_str();
        let mut last_error: Option<TransportError> = None;
        let mut attempt = 0u32;

        loop {
            let admission = self.breaker.admit(Instant::now());
            if let Admission::Rejected { retry_after } = admission {
                return Err(match last_error {
                    // Opened by our own failures: attempts were made, report them
                    Some(error) => CameraError::Transient {
                        operation: name.to_string(),
                        attempts: attempt,
                        details: format!("{} (circuit breaker opened)", error),
                    },
                    None => {
                        debug!("{} rejected by open circuit breaker", name);
                        CameraError::CircuitOpen { retry_after }
                    }
                });
            }

            // Released if this future is dropped before the attempt resolves
            let probe = self.breaker.guard(admission);
            attempt += 1;
            debug!("{} attempt {} -> {}", name, attempt, endpoint);

            let error = match timeout(self.request_timeout, self.transport.execute(&endpoint)).await {
                Ok(Ok(response)) => {
                    self.breaker.record_success();
                    probe.disarm();
                    return Ok(response.body);
                }
                Ok(Err(error)) => error,
                Err(_) => TransportError::Timeout(self.request_timeout),
            };

            self.breaker.record_failure(Instant::now());
            probe.disarm();
            let failure = CameraError::Transient {
                operation: name.to_string(),
                attempts: attempt,
                details: error.to_string(),
            };
            last_error = Some(error);

            match self.retry.action_for(name, attempt, &failure) {
                RecoveryAction::RetryAfterDelay(delay) => sleep(delay).await,
                RecoveryAction::GiveUp | RecoveryAction::Abort => return Err(failure),
            }
        }
    }
}

/// Flatten the Hero7 `{"media":[{"d":..,"fs":[{"n","s","cre"}]}]}` listing
fn parse_media_list(listing: &Value) -> Vec<MediaItem> {
    let Some(directories) = listing.get("media").and_then(Value::as_array) else {
        if !listing.is_null() {
            warn!("Media listing has no 'media' array, treating as empty");
        }
        return Vec::new();
    };

    let mut items = Vec::new();
    for directory in directories {
        let Some(dir) = directory.get("d").and_then(Value::as_str) else {
            continue;
        };
        let files = directory.get("fs").and_then(Value::as_array);
        for file in files.into_iter().flatten() {
            let Some(filename) = file.get("n").and_then(Value::as_str) else {
                continue;
            };
            let created_at = file
                .get("cre")
                .and_then(as_u64)
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

            items.push(MediaItem {
                id: format!("{}/{}", dir, filename),
                filename: filename.to_string(),
                created_at,
                size_bytes: file.get("s").and_then(as_u64).unwrap_or(0),
            });
        }
    }
    items
}

/// The camera reports numbers either as JSON numbers or numeric strings
fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
