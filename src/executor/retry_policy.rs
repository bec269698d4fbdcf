//! Retry policy for failed checks.
//!
//! Implements exponential backoff with configurable parameters.

use crate::check_client::CheckError;
use crate::config::RetrySettings;
use std::time::Duration;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per execution before a transient failure becomes terminal.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_backoff: Duration::from_secs(settings.initial_backoff_secs),
            max_backoff: Duration::from_secs(settings.max_backoff_secs),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// Check if an error should be retried after `attempt` attempts.
    ///
    /// Returns true if:
    /// - The error is transient
    /// - Fewer than `max_attempts` attempts were made
    pub fn should_retry(&self, error: &CheckError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Wait before retry number `retry_index` (0 for the first retry).
    ///
    /// `initial_backoff * multiplier^retry_index`, capped at `max_backoff`.
    pub fn backoff(&self, retry_index: u32) -> Duration {
        let backoff = self.initial_backoff.as_secs_f64()
            * self.backoff_multiplier.powi(retry_index.min(i32::MAX as u32) as i32);
        Duration::from_secs_f64(backoff.min(self.max_backoff.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetrySettings::default())
    }
}
