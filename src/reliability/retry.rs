//! Retry controller with exponential backoff
//!
//! Retries transport-class probe failures only, honouring the enclosing
//! circuit breaker: an attempt against an open circuit is rejected, not
//! retried. Intermediate failures are logged at WARN.

use crate::core::config::RetryConfig;
use crate::core::error::ProbeError;
use crate::reliability::circuit::CircuitBreaker;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_secs_f64(config.retry_delay.max(0.0)),
        )
    }

    /// Backoff before retry `attempt` (1-based): base * 2^(attempt - 1).
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `op` under `breaker`, retrying retryable failures up to
    /// `max_retries` additional times.
    pub async fn run<F, Fut, T>(
        &self,
        op_name: &str,
        breaker: &CircuitBreaker,
        mut op: F,
    ) -> Result<T, ProbeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProbeError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            breaker.try_acquire()?;
            match op().await {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    breaker.record_failure();
                    if err.is_retryable() && attempt <= self.max_retries {
                        let delay = self.backoff(attempt);
                        warn!(
                            "🔁 [Retry] {} attempt {}/{} failed ({}); backing off {:.2}s",
                            op_name,
                            attempt,
                            self.max_retries + 1,
                            err,
                            delay.as_secs_f64()
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}
