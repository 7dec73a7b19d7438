//! Exponential backoff shared by the reconnect, retry and restart loops.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial backoff in milliseconds.
    pub initial_backoff_ms: u64,

    /// Backoff multiplier.
    pub backoff_multiplier: f64,

    /// Maximum backoff in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl BackoffConfig {
    /// Creates a config.
    #[must_use]
    pub const fn new(initial_backoff_ms: u64, backoff_multiplier: f64, max_backoff_ms: u64) -> Self {
        Self {
            initial_backoff_ms,
            backoff_multiplier,
            max_backoff_ms,
        }
    }

    /// Calculates the backoff duration for a given retry count.
    #[must_use]
    pub fn calculate_backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let backoff = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let backoff = if backoff.is_finite() {
            (backoff as u64).min(self.max_backoff_ms)
        } else {
            self.max_backoff_ms
        };
        Duration::from_millis(backoff)
    }
}

/// Stateful backoff sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Creates a sequence starting at the initial delay.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Returns the next delay and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.calculate_backoff(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Returns the number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Restarts the sequence at the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
