//! Retry policy shared by capture start, turn interrupts, and agent reconnects.

use std::future::Future;
use std::time::Duration;

/// Capped exponential backoff with optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed delay (0.0..=1.0) randomly added on top.
    pub jitter: f32,
}

impl BackoffPolicy {
    /// Same delay between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait after the given 1-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = scaled.min(self.max_delay.max(self.base_delay));
        if self.jitter <= 0.0 {
            return capped;
        }
        let extra = capped.mul_f32(self.jitter * rand::random::<f32>());
        capped + extra
    }

    /// Run `op` until it succeeds, `should_retry` rejects the error, or attempts run out.
    ///
    /// The attempt number (1-based) is passed to `op`; on success the number of
    /// attempts used is returned alongside the value.
    pub async fn retry<T, E, F, Fut>(
        &self,
        mut op: F,
        should_retry: impl Fn(&E) -> bool,
    ) -> Result<(T, u32), E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(err) => {
                    if attempt >= max_attempts || !should_retry(&err) {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
