use crate::config::RetryConfig;
use crate::error::CameraError;
use std::time::Duration;
use tracing::{debug, warn};

/// Recovery action to take after a failed camera attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Retry after a delay
    RetryAfterDelay(Duration),
    /// Retry budget exhausted, surface the failure
    GiveUp,
    /// The error is not retryable, surface it unchanged
    Abort,
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Total attempts a call may make
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Decide what to do after `attempt` (1-based) failed with `error`
    pub fn action_for(&self, operation: &str, attempt: u32, error: &CameraError) -> RecoveryAction {
        if !error.is_retryable() {
            debug!("{} failed with non-retryable error: {}", operation, error);
            return RecoveryAction::Abort;
        }

        if attempt >= self.max_attempts() {
            warn!(
                "{} exhausted its retry budget ({} attempts): {}",
                operation, attempt, error
            );
            return RecoveryAction::GiveUp;
        }

        let delay = self.calculate_delay(attempt - 1);
        warn!(
            "{} failed (attempt {}/{}), retrying in {:?}: {}",
            operation,
            attempt,
            self.max_attempts(),
            delay,
            error
        );
        RecoveryAction::RetryAfterDelay(delay)
    }

    /// Delay before retry number `retry_index` (0-based), doubling and capped
    pub fn calculate_delay(&self, retry_index: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_index).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}
