//! Retry with exponential backoff for provider calls.
//!
//! Transient failures (5xx, rate limits, connection errors) are retried up
//! to five attempts. Context-limit errors and cancellation are terminal by
//! contract and propagate on the first occurrence.

use std::future::Future;
use std::time::Duration;

use mf_domain::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(2),
            factor: 2.0,
            cap: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = self.base.as_millis() as f64 * self.factor.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis(ms as u64).min(self.cap)
    }
}

/// Run `op` under the backoff policy.
pub async fn retry<T, F, Fut>(policy: Backoff, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => {
                tracing::warn!(error = %e, attempt, "provider call failed, retries exhausted");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "provider call failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
