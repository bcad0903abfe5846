use std::time::Duration;
use tracing::debug;

use crate::errors::DdlError;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay to wait before the given attempt (1-based) is retried.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Retry with exponential backoff.
///
/// Only errors classified as transient are retried; everything else is
/// returned on the first failure.
pub async fn retry_with_backoff<F, T, E>(config: &RetryConfig, operation: F) -> Result<T, DdlError>
where
    F: Fn() -> Result<T, E>,
    E: Into<DdlError>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation() {
            Ok(result) => return Ok(result),
            Err(error) => {
                let error = error.into();
                if !error.is_retryable() || attempt >= config.max_retries {
                    return Err(error);
                }
                let delay = config.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, %error, "retrying operation");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
