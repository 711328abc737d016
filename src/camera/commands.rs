//! Hero7 command catalog.
//!
//! Every logical camera operation resolves to exactly one endpoint. GoPro
//! commands carry their payload in the path or the query string, so the
//! descriptor has no body.

use super::types::{CameraMode, CameraSetting};
use crate::error::CameraError;
use reqwest::Method;
use std::fmt;
use std::str::FromStr;

const STATUS: &str = "/gp/gpControl/status";
const INFO: &str = "/gp/gpControl/info";
const COMMAND_MODE: &str = "/gp/gpControl/command/mode";
const COMMAND_SHUTTER: &str = "/gp/gpControl/command/shutter";
const COMMAND_SETTING: &str = "/gp/gpControl/setting";
const MEDIA_LIST: &str = "/gp/gpMediaList";
const MEDIA_DOWNLOAD: &str = "/videos/DCIM";

const SHUTTER_STOP: u32 = 0;
const SHUTTER_START: u32 = 1;

/// Which camera server an endpoint lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointTarget {
    /// Control API (port 80 on the camera)
    Control,
    /// Media server (port 8080 on the camera)
    Media,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub method: Method,
    pub target: EndpointTarget,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl EndpointDescriptor {
    fn get(target: EndpointTarget, path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            target,
            path: path.into(),
            query: Vec::new(),
        }
    }

    fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        for (i, (key, value)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, key, value)?;
        }
        if self.target == EndpointTarget::Media {
            write!(f, " (media)")?;
        }
        Ok(())
    }
}

/// Logical camera operation with typed parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraOperation {
    GetStatus,
    GetInfo,
    SetMode(CameraMode),
    StartCapture,
    StopCapture,
    SetSetting { setting: CameraSetting, option: u32 },
    ListMedia,
    DownloadMedia { directory: String, filename: String },
}

/// Operation names without parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    GetStatus,
    GetInfo,
    SetMode,
    StartCapture,
    StopCapture,
    SetSetting,
    ListMedia,
    DownloadMedia,
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::GetStatus,
        OperationKind::GetInfo,
        OperationKind::SetMode,
        OperationKind::StartCapture,
        OperationKind::StopCapture,
        OperationKind::SetSetting,
        OperationKind::ListMedia,
        OperationKind::DownloadMedia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::GetStatus => "get_status",
            OperationKind::GetInfo => "get_info",
            OperationKind::SetMode => "set_mode",
            OperationKind::StartCapture => "start_capture",
            OperationKind::StopCapture => "stop_capture",
            OperationKind::SetSetting => "set_setting",
            OperationKind::ListMedia => "list_media",
            OperationKind::DownloadMedia => "download_media",
        }
    }

    /// Endpoint template with parameters shown as placeholders
    pub fn template(&self) -> &'static str {
        match self {
            OperationKind::GetStatus => "GET /gp/gpControl/status",
            OperationKind::GetInfo => "GET /gp/gpControl/info",
            OperationKind::SetMode => "GET /gp/gpControl/command/mode?p=<mode>",
            OperationKind::StartCapture => "GET /gp/gpControl/command/shutter?p=1",
            OperationKind::StopCapture => "GET /gp/gpControl/command/shutter?p=0",
            OperationKind::SetSetting => "GET /gp/gpControl/setting/<setting>/<option>",
            OperationKind::ListMedia => "GET /gp/gpMediaList",
            OperationKind::DownloadMedia => "GET /videos/DCIM/<directory>/<filename> (media)",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .find(|kind| kind.as_str() == name)
            .copied()
            .ok_or_else(|| CameraError::UnknownOperation {
                operation: s.to_string(),
            })
    }
}

impl CameraOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            CameraOperation::GetStatus => OperationKind::GetStatus,
            CameraOperation::GetInfo => OperationKind::GetInfo,
            CameraOperation::SetMode(_) => OperationKind::SetMode,
            CameraOperation::StartCapture => OperationKind::StartCapture,
            CameraOperation::StopCapture => OperationKind::StopCapture,
            CameraOperation::SetSetting { .. } => OperationKind::SetSetting,
            CameraOperation::ListMedia => OperationKind::ListMedia,
            CameraOperation::DownloadMedia { .. } => OperationKind::DownloadMedia,
        }
    }

    /// Build a download operation from a `<directory>/<filename>` media id
    pub fn download(media_id: &str) -> Result<Self, CameraError> {
        let mut parts = media_id.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(directory), Some(filename), None)
                if is_safe_segment(directory) && is_safe_segment(filename) =>
            {
                Ok(CameraOperation::DownloadMedia {
                    directory: directory.to_string(),
                    filename: filename.to_string(),
                })
            }
            _ => Err(CameraError::invalid_parameter(
                "media_id",
                format!("'{}' is not of the form <directory>/<filename>", media_id),
            )),
        }
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains('\\')
}

/// Static lookup from operations to Hero7 endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandMap;

impl CommandMap {
    pub fn resolve(operation: &CameraOperation) -> EndpointDescriptor {
        use EndpointTarget::{Control, Media};

        match operation {
            CameraOperation::GetStatus => EndpointDescriptor::get(Control, STATUS),
            CameraOperation::GetInfo => EndpointDescriptor::get(Control, INFO),
            CameraOperation::SetMode(mode) => {
                EndpointDescriptor::get(Control, COMMAND_MODE).with_query("p", mode.hero7_value())
            }
            CameraOperation::StartCapture => {
                EndpointDescriptor::get(Control, COMMAND_SHUTTER).with_query("p", SHUTTER_START)
            }
            CameraOperation::StopCapture => {
                EndpointDescriptor::get(Control, COMMAND_SHUTTER).with_query("p", SHUTTER_STOP)
            }
            CameraOperation::SetSetting { setting, option } => EndpointDescriptor::get(
                Control,
                format!("{}/{}/{}", COMMAND_SETTING, setting.id(), option),
            ),
            CameraOperation::ListMedia => EndpointDescriptor::get(Control, MEDIA_LIST),
            CameraOperation::DownloadMedia {
                directory,
                filename,
            } => EndpointDescriptor::get(
                Media,
                format!("{}/{}/{}", MEDIA_DOWNLOAD, directory, filename),
            ),
        }
    }

    /// Look up the endpoint template for an operation name
    pub fn template_for(name: &str) -> Result<(OperationKind, &'static str), CameraError> {
        let kind: OperationKind = name.parse()?;
        Ok((kind, kind.template()))
    }
}
