//! Bounded retry with exponential backoff.
//!
//! Only transient gateway failures are retried. Authentication failures stop
//! immediately: the service will keep rejecting the same credential.

use crate::error::GatewayError;
use std::future::Future;
use std::time::Duration;

/// Retry budget for one gateway operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::queries()
    }
}

impl RetryPolicy {
    /// Policy for cache fetches.
    pub const fn queries() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(1), max_delay: Duration::from_secs(30) }
    }

    /// Policy for mutations: a single retry at most.
    pub const fn mutations() -> Self {
        Self { max_retries: 1, base_delay: Duration::from_secs(1), max_delay: Duration::from_secs(30) }
    }

    pub const fn none() -> Self {
        Self { max_retries: 0, base_delay: Duration::ZERO, max_delay: Duration::ZERO }
    }

    /// Delay before retry number `attempt` (1-based), doubling up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn should_retry(&self, err: &GatewayError, attempt: u32) -> bool {
        attempt <= self.max_retries && !err.is_auth() && err.is_transient()
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if !self.should_retry(&err, attempt) {
                        if err.is_auth() {
                            tracing::debug!(error = %err, "authentication failure, not retrying");
                        }
                        return Err(err);
                    }

                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying gateway call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
