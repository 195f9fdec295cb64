//! Reconnect Delay Policy
//!
//! Decides how long a dropped stream waits before the next connection
//! attempt. The default is a fixed 5 second delay with unlimited attempts;
//! a multiplier above 1.0 turns it into capped exponential backoff, and a
//! jitter fraction spreads simultaneous reconnects apart.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::StreamSettings;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Reconnect timing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt after a drop.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failed attempt (1.0 = fixed).
    pub multiplier: f64,
    /// Random spread as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = never give up).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectConfig {
    /// Same delay every time, no jitter, unlimited attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Build from stream settings.
    #[must_use]
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay,
            max_delay: settings.reconnect_delay_max.max(settings.reconnect_delay),
            multiplier: settings.reconnect_multiplier.max(1.0),
            jitter_factor: if settings.reconnect_jitter.is_finite() {
                settings.reconnect_jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// Delay for the `attempt`-th consecutive attempt (1-based), before jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let max_millis = self.max_delay.as_millis();

        if !millis.is_finite() {
            return self.max_delay;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = millis.round().max(0.0) as u128;
        Duration::from_millis(u64::try_from(scaled.min(max_millis)).unwrap_or(u64::MAX))
    }
}

/// Stateful attempt counter over a [`ReconnectConfig`].
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Start a fresh policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempts += 1;
        Some(self.jittered(self.config.base_delay(self.attempts)))
    }

    /// Forget previous failures after a successful connection.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if !factor.is_finite() || factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        #[allow(clippy::cast_precision_loss)]
        let millis = delay.as_millis() as f64;
        let spread = millis * factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = (millis + offset).max(1.0) as u64;
        Duration::from_millis(adjusted)
    }
}
