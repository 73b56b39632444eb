//! Reconnect backoff for the realtime stream

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for reconnect behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first reconnect, in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,

    /// Multiplier for exponential backoff (default: 2.0)
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 10,
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Create a configuration with custom delays
    pub fn with_delays(initial_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            max_attempts,
            ..Default::default()
        }
    }

    /// Delay before reconnect number `attempt` (zero-based)
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let delay_ms = if exponential.is_finite() {
            (exponential as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(delay_ms)
    }
}

/// Exponential backoff state for one connection
///
/// A successful open calls [`reset`](Self::reset); every failure asks for
/// [`next_delay`](Self::next_delay) until the attempt ceiling is reached.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        let delay = self.config.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Failed attempts since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
