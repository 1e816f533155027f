//! Bounded exponential backoff for calls into the task store and the channel.

use std::fmt::Display;
use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use tracing::warn;

const MAX_DELAY: Duration = Duration::from_secs(30);

/// Classifies failures that are worth another attempt.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    attempts: NonZeroU32,
    base_delay: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: NonZeroU32::new(5).unwrap_or(NonZeroU32::MIN),
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// `multiplier` values below 1.0 are clamped to 1.0.
    pub fn new(attempts: NonZeroU32, base_delay: Duration, multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        Self {
            attempts,
            base_delay,
            multiplier,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }

    /// Delay slept after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let seconds = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(seconds)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    /// The last error is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, name: &'static str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let max_attempts = self.attempts.get();
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && err.is_transient() => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        target = "imgproc::retry",
                        operation = name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    metrics::counter!("imgproc_retry_attempts_total", "operation" => name)
                        .increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
