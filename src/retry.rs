//! Fixed-count, fixed-delay retry shared by the collector and sync adapters.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never below 1.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// The last error of a failed retry run and how many attempts were spent.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
    /// False when the error was not retryable and the run stopped early.
    pub exhausted: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Runs `op` until it succeeds, returns a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        operation: &str,
        mut op: F,
        retryable: P,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !retryable(&error) => {
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                        exhausted: false,
                    });
                }
                Err(error) if attempt >= max_attempts => {
                    warn!(operation, attempts = attempt, %error, "giving up");
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                        exhausted: true,
                    });
                }
                Err(error) => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_secs = self.delay.as_secs_f64(),
                        %error,
                        "attempt failed, retrying"
                    );
                    sleep(self.delay).await;
                }
            }
        }
    }
}
