use crate::error::CameraError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Capture mode the camera can be switched into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    Photo,
    Video,
    Timelapse,
}

impl CameraMode {
    pub const ALL: [CameraMode; 3] = [CameraMode::Photo, CameraMode::Video, CameraMode::Timelapse];

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraMode::Photo => "photo",
            CameraMode::Video => "video",
            CameraMode::Timelapse => "timelapse",
        }
    }

    /// Hero7 `p` value for the mode command and status field 43
    pub fn hero7_value(&self) -> u32 {
        match self {
            CameraMode::Video => 0,
            CameraMode::Photo => 1,
            CameraMode::Timelapse => 2,
        }
    }

    /// Unknown values read back as video, which is the camera's boot mode
    pub fn from_hero7_value(value: u64) -> Self {
        match value {
            1 => CameraMode::Photo,
            2 => CameraMode::Timelapse,
            _ => CameraMode::Video,
        }
    }
}

impl fmt::Display for CameraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CameraMode {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "photo" => Ok(CameraMode::Photo),
            "video" => Ok(CameraMode::Video),
            "timelapse" => Ok(CameraMode::Timelapse),
            other => Err(CameraError::invalid_parameter(
                "mode",
                format!("unknown camera mode '{}' (expected photo, video or timelapse)", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Capturing,
}

/// Snapshot of the camera as reported by the status and info endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraStatus {
    pub mode: CameraMode,
    pub capture_state: CaptureState,
    pub settings: BTreeMap<String, serde_json::Value>,
    pub media_count: u64,
}

/// One file stored on the camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// `<directory>/<filename>`, e.g. `100GOPRO/GX010001.MP4`
    pub id: String,
    pub filename: String,
    pub created_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPage {
    pub items: Vec<MediaItem>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadReceipt {
    pub media_id: String,
    pub destination: PathBuf,
    pub bytes_written: u64,
}

/// Hero7 setting catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraSetting {
    VideoResolution,
    VideoFps,
    VideoFov,
    TimelapseInterval,
    Protune,
    WhiteBalance,
    Color,
    IsoLimit,
    Sharpness,
    EvComp,
    PhotoResolution,
    PhotoFov,
}

impl CameraSetting {
    pub const ALL: [CameraSetting; 12] = [
        CameraSetting::VideoResolution,
        CameraSetting::VideoFps,
        CameraSetting::VideoFov,
        CameraSetting::TimelapseInterval,
        CameraSetting::Protune,
        CameraSetting::WhiteBalance,
        CameraSetting::Color,
        CameraSetting::IsoLimit,
        CameraSetting::Sharpness,
        CameraSetting::EvComp,
        CameraSetting::PhotoResolution,
        CameraSetting::PhotoFov,
    ];

    pub fn id(&self) -> u32 {
        match self {
            CameraSetting::VideoResolution => 2,
            CameraSetting::VideoFps => 3,
            CameraSetting::VideoFov => 4,
            CameraSetting::TimelapseInterval => 5,
            CameraSetting::Protune => 10,
            CameraSetting::WhiteBalance => 11,
            CameraSetting::Color => 12,
            CameraSetting::IsoLimit => 13,
            CameraSetting::Sharpness => 14,
            CameraSetting::EvComp => 15,
            CameraSetting::PhotoResolution => 17,
            CameraSetting::PhotoFov => 19,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CameraSetting::VideoResolution => "video_resolution",
            CameraSetting::VideoFps => "video_fps",
            CameraSetting::VideoFov => "video_fov",
            CameraSetting::TimelapseInterval => "timelapse_interval",
            CameraSetting::Protune => "protune",
            CameraSetting::WhiteBalance => "white_balance",
            CameraSetting::Color => "color",
            CameraSetting::IsoLimit => "iso_limit",
            CameraSetting::Sharpness => "sharpness",
            CameraSetting::EvComp => "ev_comp",
            CameraSetting::PhotoResolution => "photo_resolution",
            CameraSetting::PhotoFov => "photo_fov",
        }
    }

    /// Resolve a setting by catalog name or numeric id
    pub fn from_key(key: &str) -> Result<Self, CameraError> {
        let key = key.trim();
        let found = match key.parse::<u32>() {
            Ok(id) => Self::ALL.iter().find(|s| s.id() == id),
            Err(_) => {
                let lowered = key.to_ascii_lowercase();
                Self::ALL.iter().find(|s| s.name() == lowered)
            }
        };

        found
            .copied()
            .ok_or_else(|| CameraError::invalid_parameter("setting", format!("unknown setting '{}'", key)))
    }
}

impl fmt::Display for CameraSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}
