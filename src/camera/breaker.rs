//! Circuit breaker guarding the camera link.
//!
//! ```text
//! Closed   -> Open:     consecutive_failures reaches the threshold
//! Open     -> HalfOpen: cooldown elapsed since opened_at, one probe admitted
//! HalfOpen -> Closed:   probe succeeded
//! HalfOpen -> Open:     probe failed, cooldown restarts
//! ```
//!
//! All state lives in one [`CircuitState`] behind a single lock which is never
//! held across an await point. Methods take `now` so tests control time.

use crate::config::BreakerConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitState {
    fn closed() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Outcome of asking the breaker for permission to call the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// This call is the single half-open probe
    Probe,
    Rejected { retry_after: Duration },
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self::with_limits(config.failure_threshold, config.cooldown())
    }

    pub fn with_limits(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(CircuitState::closed()),
        }
    }

    pub fn snapshot(&self) -> CircuitState {
        self.state.lock().clone()
    }

    pub fn status(&self) -> CircuitStatus {
        self.state.lock().status
    }

    pub fn admit(&self, now: Instant) -> Admission {
        let mut state = self.state.lock();

        match state.status {
            CircuitStatus::Closed => Admission::Admitted,
            CircuitStatus::Open => {
                let opened_at = state.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.cooldown {
                    state.status = CircuitStatus::HalfOpen;
                    state.probe_in_flight = true;
                    info!("Circuit breaker half-open, admitting probe request");
                    Admission::Probe
                } else {
                    Admission::Rejected {
                        retry_after: self.cooldown - elapsed,
                    }
                }
            }
            CircuitStatus::HalfOpen => {
                if state.probe_in_flight {
                    Admission::Rejected {
                        retry_after: Duration::ZERO,
                    }
                } else {
                    state.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();

        if state.status != CircuitStatus::Closed {
            info!(
                "Circuit breaker closed after successful probe ({} prior failures)",
                state.consecutive_failures
            );
        }
        *state = CircuitState::closed();
    }

    /// Count a failed attempt; returns the status after the failure
    pub fn record_failure(&self, now: Instant) -> CircuitStatus {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let trip = match state.status {
            CircuitStatus::HalfOpen => true,
            CircuitStatus::Closed => state.consecutive_failures >= self.failure_threshold,
            CircuitStatus::Open => false,
        };

        if trip {
            warn!(
                "Circuit breaker opened after {} consecutive failures, cooling down for {:?}",
                state.consecutive_failures, self.cooldown
            );
            state.status = CircuitStatus::Open;
            state.opened_at = Some(now);
            state.probe_in_flight = false;
        }

        state.status
    }

    /// Release a probe slot without an outcome (e.g. the call failed locally)
    pub fn release_probe(&self) {
        let mut state = self.state.lock();
        if state.status == CircuitStatus::HalfOpen {
            state.probe_in_flight = false;
        }
    }

    /// Tie an admission to a scope: a probe that ends without a recorded
    /// outcome, including by the caller's future being dropped, is released.
    pub fn guard(&self, admission: Admission) -> ProbeGuard<'_> {
        ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        }
    }
}

/// Releases an unresolved half-open probe on drop
pub struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl ProbeGuard<'_> {
    /// The outcome was recorded; nothing to release
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Probe ended without an outcome, releasing half-open slot");
            self.breaker.release_probe();
        }
    }
}
