//! Waiting and bounded retry.
//!
//! Every wait in the controller goes through a [`Sleeper`] so tests can
//! replace the clock and assert the exact delay schedule.

use std::time::Duration;

use async_trait::async_trait;

/// Something that can wait.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Bounded linear retry: attempt `i` (0-based) is followed by a wait of `i * step`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Increment added to the wait after each attempt.
    pub step: Duration,
}

impl Default for RetryPolicy {
    /// 5 attempts, waiting 0, 2, 4, 6, 8 seconds.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, step: Duration) -> Self {
        Self { max_attempts, step }
    }

    /// Wait after the given 0-based attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }

    /// The whole delay schedule; the entry after the final attempt is never slept.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts).map(|a| self.delay_after(a)).collect()
    }
}
