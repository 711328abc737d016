mod breaker;
mod builder;
mod client;
mod commands;
mod mock;
mod transport;
mod types;

pub use breaker::{Admission, CircuitBreaker, CircuitState, CircuitStatus, ProbeGuard};
pub use builder::CameraClientBuilder;
pub use client::ResilientCameraClient;
pub use commands::{CameraOperation, CommandMap, EndpointDescriptor, EndpointTarget, OperationKind};
pub use mock::MockTransport;
pub use transport::{CameraResponse, CameraTransport, HttpTransport, TransportError};
pub use types::{
    CameraMode, CameraSetting, CameraStatus, CaptureState, DownloadReceipt, MediaItem, MediaPage,
};
