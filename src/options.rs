use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::counter::{MAX_WINDOW_SECONDS, MIN_WINDOW_SECONDS};
use crate::error::BreakerError;

/// Breaker tuning. Fixed for the lifetime of a [`Breaker`](crate::Breaker).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Error rate (0-100) at or above which the breaker opens.
    #[serde(default = "default_error_percentage_threshold")]
    pub error_percentage_threshold: f64,
    /// Requests that must be seen in the window before the breaker may open.
    #[serde(default = "default_minimum_request_volume")]
    pub minimum_request_volume: u64,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u32, // 1..=60
}
fn default_error_percentage_threshold() -> f64 { 50.0 }
fn default_minimum_request_volume() -> u64 { 20 }
fn default_window_seconds() -> u32 { 10 }

impl Default for Options {
    fn default() -> Self {
        Self {
            error_percentage_threshold: default_error_percentage_threshold(),
            minimum_request_volume: default_minimum_request_volume(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<(), BreakerError> {
        if !(MIN_WINDOW_SECONDS..=MAX_WINDOW_SECONDS).contains(&self.window_seconds) {
            return Err(BreakerError::InvalidWindow(self.window_seconds));
        }
        if !self.error_percentage_threshold.is_finite() {
            return Err(BreakerError::InvalidThreshold(self.error_percentage_threshold));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.window_seconds))
    }

    pub fn with_error_percentage_threshold(mut self, threshold: f64) -> Self {
        self.error_percentage_threshold = threshold;
        self
    }

    pub fn with_minimum_request_volume(mut self, volume: u64) -> Self {
        self.minimum_request_volume = volume;
        self
    }

    pub fn with_window_seconds(mut self, seconds: u32) -> Self {
        self.window_seconds = seconds;
        self
    }
}
