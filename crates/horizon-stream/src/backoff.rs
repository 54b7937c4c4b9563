//! Reconnection policy: exponential backoff with a bounded attempt counter.

use std::time::Duration;

/// Initial reconnection backoff duration.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum reconnection backoff duration (cap).
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Maximum number of consecutive reconnection attempts before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: INITIAL_BACKOFF,
            cap: MAX_BACKOFF,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Decision returned for a failure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then try attempt number `attempt` (1-indexed).
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted; the counter has been reset and nothing more is
    /// scheduled until an external trigger.
    GiveUp { attempts: u32 },
}

/// Reconnect counter plus backoff computation.
///
/// The counter is reset by [`reset`](Self::reset) on every successful
/// connect, incremented by every failure signal, and reset again once it
/// reaches `max_attempts`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: BackoffConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Called on every successful `Connected` transition.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Handle one failure signal.
    pub fn on_failure(&mut self) -> RetryDecision {
        if self.attempts < self.config.max_attempts {
            self.attempts += 1;
            RetryDecision::Retry {
                attempt: self.attempts,
                delay: self.delay_for(self.attempts),
            }
        } else {
            let attempts = self.attempts;
            self.attempts = 0;
            RetryDecision::GiveUp { attempts }
        }
    }

    /// Backoff before attempt `n`: `min(base * 2^(n-1), cap)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        compute_backoff(self.config.base_delay, self.config.cap, attempt)
    }
}

/// Compute exponential backoff duration for reconnection attempt `n`.
///
/// The formula is `base * 2^(n-1)`, capped at `cap`.
pub fn compute_backoff(base: Duration, cap: Duration, attempt: u32) -> Duration {
    // checked_shl returns None if the shift amount would overflow.
    let exponent = attempt.saturating_sub(1);
    let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.checked_mul(multiplier).unwrap_or(cap).min(cap)
}
