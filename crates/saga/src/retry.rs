//! Fixed-delay retry policy for saga steps.

use std::time::Duration;

use common::Context;

/// How often a failing step is run again, and how long to wait in between.
///
/// A step with `max_retries = R` runs at most `R + 1` times. Retrying is
/// independent of compensation: a step that exhausts its retries never
/// succeeded, so its own compensation is not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total attempts allowed, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns true if another attempt may follow failed attempt number
    /// `attempt` (counting from 1).
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Sleeps for the delay.
    ///
    /// Returns `false` without waiting the full delay if `ctx` is cancelled.
    pub async fn wait(&self, ctx: &Context) -> bool {
        if ctx.is_cancelled() {
            return false;
        }
        tokio::select! {
            () = ctx.cancelled() => false,
            () = tokio::time::sleep(self.delay) => true,
        }
    }
}
