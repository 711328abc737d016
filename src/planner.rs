use crate::camera::CameraMode;
use crate::error::{CameraError, Result};
use crate::session::CameraIntent;
use async_trait::async_trait;
use tracing::debug;

/// Turns a free-text shot description into a validated intent
#[async_trait]
pub trait IntentPlanner: Send + Sync {
    /// `mode` is a hard constraint when given
    async fn plan(&self, prompt: &str, mode: Option<CameraMode>) -> Result<CameraIntent>;
}

/// Deterministic keyword-based planner
#[derive(Debug, Default, Clone)]
pub struct KeywordPlanner;

const PHOTO_WORDS: [&str; 5] = ["photo", "picture", "snap", "shoot", "capture a shot"];
const SECOND_UNITS: [&str; 5] = ["s", "sec", "secs", "second", "seconds"];
const MINUTE_UNITS: [&str; 5] = ["m", "min", "mins", "minute", "minutes"];

/// Capture length named in a prompt ("record for 15 seconds", "2 min", "30s")
///
/// Seconds win over minutes when both appear.
pub fn parse_duration_secs(prompt: &str) -> Option<u64> {
    let prompt = prompt.to_lowercase();
    let tokens: Vec<&str> = prompt
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    amount_with_unit(&tokens, &SECOND_UNITS)
        .or_else(|| amount_with_unit(&tokens, &MINUTE_UNITS).and_then(|m| m.checked_mul(60)))
}

/// First `<number><unit>` or `<number> <unit>` pair
fn amount_with_unit(tokens: &[&str], units: &[&str]) -> Option<u64> {
    tokens.iter().enumerate().find_map(|(i, token)| {
        let split = token.find(|c: char| !c.is_ascii_digit()).unwrap_or(token.len());
        let (digits, suffix) = token.split_at(split);
        if digits.is_empty() {
            return None;
        }
        let unit = if suffix.is_empty() {
            *tokens.get(i + 1)?
        } else {
            suffix
        };
        if units.contains(&unit) {
            digits.parse().ok()
        } else {
            None
        }
    })
}

impl KeywordPlanner {
    pub fn new() -> Self {
        Self
    }

    fn infer_mode(prompt: &str) -> CameraMode {
        let prompt = prompt.to_lowercase();
        if prompt.contains("timelapse") {
            CameraMode::Timelapse
        } else if PHOTO_WORDS.iter().any(|word| prompt.contains(word)) {
            CameraMode::Photo
        } else {
            CameraMode::Video
        }
    }
}

#[async_trait]
impl IntentPlanner for KeywordPlanner {
    async fn plan(&self, prompt: &str, mode: Option<CameraMode>) -> Result<CameraIntent> {
        let objective = prompt.trim();
        if objective.is_empty() {
            return Err(CameraError::invalid_parameter("prompt", "must not be empty").into());
        }

        let mode = mode.unwrap_or_else(|| Self::infer_mode(objective));
        let duration_secs = parse_duration_secs(objective);
        debug!(
            "Planned {} intent for '{}' (duration {:?}s)",
            mode, objective, duration_secs
        );
        Ok(CameraIntent::new(objective, mode).with_duration_secs(duration_secs))
    }
}
