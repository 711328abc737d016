use crate::camera::{CameraMode, CameraSetting};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GopilotConfig {
    pub camera: CameraConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub readiness: ReadinessConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Control API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Media server base URL (downloads)
    #[serde(default = "default_media_base_url")]
    pub media_base_url: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout for a whole media download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay between retries
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the breaker stays open before a probe is admitted
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReadinessConfig {
    /// Framing score that must be exceeded
    #[serde(default = "default_framing_threshold")]
    pub framing: f64,

    /// Lighting score that must be exceeded
    #[serde(default = "default_lighting_threshold")]
    pub lighting: f64,

    /// Motion stability score that must be exceeded
    #[serde(default = "default_motion_threshold")]
    pub motion: f64,

    /// Readiness polling period
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Stop the session after this many ticks (0 = unlimited)
    #[serde(default)]
    pub max_ticks: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Append-only audit log location
    #[serde(default = "default_audit_path")]
    pub audit_path: PathBuf,

    /// Confirm capture automatically once the scene is ready
    #[serde(default = "default_auto_confirm")]
    pub auto_confirm: bool,

    /// Capture length before stopping automatically
    #[serde(default = "default_capture_seconds")]
    pub capture_seconds: u64,

    /// What a failed stop_capture does to the session
    #[serde(default)]
    pub stop_failure_policy: StopFailurePolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopFailurePolicy {
    /// Record the anomaly and advance to reviewing
    #[default]
    LogAndContinue,
    /// Treat the failure as session-fatal
    Escalate,
}

/// Named camera preset
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProfileConfig {
    pub mode: CameraMode,
    /// Setting name or id -> option id
    #[serde(default)]
    pub settings: BTreeMap<String, u32>,
}

impl CameraConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl ReadinessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            framing: default_framing_threshold(),
            lighting: default_lighting_threshold(),
            motion: default_motion_threshold(),
            poll_interval_ms: default_poll_interval_ms(),
            max_ticks: 0,
        }
    }
}

impl SessionConfig {
    pub fn capture_duration(&self) -> Duration {
        Duration::from_secs(self.capture_seconds)
    }
}

impl GopilotConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("gopilot.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("camera.base_url", default_base_url())?
            .set_default("camera.media_base_url", default_media_base_url())?
            .set_default("camera.request_timeout_ms", default_request_timeout_ms())?
            .set_default("camera.download_timeout_secs", default_download_timeout_secs())?
            .set_default("retry.max_retries", default_max_retries())?
            .set_default("retry.base_delay_ms", default_base_delay_ms())?
            .set_default("retry.max_delay_ms", default_max_delay_ms())?
            .set_default("breaker.failure_threshold", default_failure_threshold())?
            .set_default("breaker.cooldown_ms", default_cooldown_ms())?
            .set_default("readiness.framing", default_framing_threshold())?
            .set_default("readiness.lighting", default_lighting_threshold())?
            .set_default("readiness.motion", default_motion_threshold())?
            .set_default("readiness.poll_interval_ms", default_poll_interval_ms())?
            .set_default("readiness.max_ticks", 0u64)?
            .set_default(
                "session.audit_path",
                default_audit_path().to_string_lossy().to_string(),
            )?
            .set_default("session.auto_confirm", default_auto_confirm())?
            .set_default("session.capture_seconds", default_capture_seconds())?
            .set_default("session.stop_failure_policy", "log_and_continue")?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables, e.g. GOPILOT__BREAKER__COOLDOWN_MS
            .add_source(
                Environment::with_prefix("GOPILOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: GopilotConfig = settings.try_deserialize()?;
        for (name, profile) in default_profiles() {
            config.profiles.entry(name).or_insert(profile);
        }

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.request_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Camera request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.camera.download_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Camera download_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Message(
                "Retry base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Message(
                "Breaker failure_threshold must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("framing", self.readiness.framing),
            ("lighting", self.readiness.lighting),
            ("motion", self.readiness.motion),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Message(format!(
                    "Readiness {} threshold must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.readiness.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Readiness poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        for (name, profile) in &self.profiles {
            for key in profile.settings.keys() {
                CameraSetting::from_key(key).map_err(|e| {
                    ConfigError::Message(format!("Profile '{}': {}", name, e))
                })?;
            }
        }

        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.get(name)
    }
}

impl Default for GopilotConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                base_url: default_base_url(),
                media_base_url: default_media_base_url(),
                request_timeout_ms: default_request_timeout_ms(),
                download_timeout_secs: default_download_timeout_secs(),
            },
            retry: RetryConfig {
                max_retries: default_max_retries(),
                base_delay_ms: default_base_delay_ms(),
                max_delay_ms: default_max_delay_ms(),
            },
            breaker: BreakerConfig {
                failure_threshold: default_failure_threshold(),
                cooldown_ms: default_cooldown_ms(),
            },
            readiness: ReadinessConfig::default(),
            session: SessionConfig {
                audit_path: default_audit_path(),
                auto_confirm: default_auto_confirm(),
                capture_seconds: default_capture_seconds(),
                stop_failure_policy: StopFailurePolicy::default(),
            },
            profiles: default_profiles(),
        }
    }
}

// Default value functions
fn default_base_url() -> String {
    "http://10.5.5.9".to_string()
}
fn default_media_base_url() -> String {
    "http://10.5.5.9:8080".to_string()
}
fn default_request_timeout_ms() -> u64 {
    3000
}
fn default_download_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    2000
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown_ms() -> u64 {
    8000
}

fn default_framing_threshold() -> f64 {
    0.75
}
fn default_lighting_threshold() -> f64 {
    0.7
}
fn default_motion_threshold() -> f64 {
    0.65
}
fn default_poll_interval_ms() -> u64 {
    250
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("session_logs/audit.jsonl")
}
fn default_auto_confirm() -> bool {
    true
}
fn default_capture_seconds() -> u64 {
    10
}

fn default_profiles() -> BTreeMap<String, ProfileConfig> {
    let profile = |mode, settings: &[(&str, u32)]| ProfileConfig {
        mode,
        settings: settings
            .iter()
            .map(|(key, option)| (key.to_string(), *option))
            .collect(),
    };

    BTreeMap::from([
        (
            "indoor_photo".to_string(),
            profile(
                CameraMode::Photo,
                &[("photo_resolution", 12), ("photo_fov", 3), ("ev_comp", 5)],
            ),
        ),
        (
            "outdoor_video".to_string(),
            profile(
                CameraMode::Video,
                &[("video_resolution", 9), ("video_fps", 8), ("video_fov", 0)],
            ),
        ),
        (
            "vlog_walk".to_string(),
            profile(
                CameraMode::Video,
                &[("video_resolution", 9), ("video_fps", 5), ("video_fov", 4)],
            ),
        ),
    ])
}
