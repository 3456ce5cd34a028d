//! Retry logic for provider calls
//!
//! Bounded retry with a pluggable backoff strategy. Provider calls go
//! through [`retry_if`] with [`ProviderError::is_retryable`] as predicate so
//! that only rate-limit signals and transport failures are retried;
//! "data unavailable" and malformed responses return immediately.
//!
//! ## Usage
//!
//! ```rust
//! use route_risk_orchestrator::retry::{retry_if, RetryPolicy};
//! use route_risk_orchestrator::ProviderError;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
//! let result: Result<u32, ProviderError> = retry_if(
//!     &policy,
//!     || async { Err(ProviderError::Unavailable("no lives".into())) },
//!     ProviderError::is_retryable,
//! )
//! .await;
//! assert!(matches!(result, Err(ProviderError::Unavailable(_))));
//! # }
//! ```
//!
//! [`ProviderError::is_retryable`]: crate::ProviderError::is_retryable

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `0` is treated as `1`.
    pub max_attempts: usize,
    /// Delay schedule between attempts.
    pub strategy: RetryStrategy,
}

/// Retry backoff strategy
#[derive(Clone, Debug)]
pub enum RetryStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Exponential backoff (delay multiplies each time, capped)
    Exponential {
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    },
    /// Linear backoff (delay increases linearly)
    Linear {
        initial_delay: Duration,
        increment: Duration,
    },
}

impl RetryPolicy {
    /// Create policy with fixed delay
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Fixed(delay),
        }
    }

    /// Create policy with exponential backoff, doubling up to `max_delay`.
    pub fn exponential(max_attempts: usize, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Exponential {
                initial_delay,
                max_delay,
                multiplier: 2.0,
            },
        }
    }

    /// Create policy with linear backoff
    pub fn linear(max_attempts: usize, initial_delay: Duration, increment: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Linear {
                initial_delay,
                increment,
            },
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let n = attempt.saturating_sub(1);
        match &self.strategy {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let millis = initial_delay.as_millis() as f64 * multiplier.powi(n as i32);
                Duration::from_millis(millis as u64).min(*max_delay)
            }
            RetryStrategy::Linear {
                initial_delay,
                increment,
            } => *initial_delay + increment.saturating_mul(n as u32),
        }
    }

    fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
}

/// Conditional retry: only errors for which `should_retry` is `true` are
/// retried; any other error is returned at once.
pub async fn retry_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut f: F,
    mut should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: Display,
{
    let max = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "retry: operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) => {
                if !should_retry(&e) {
                    debug!(error = %e, "retry: error is not retryable");
                    return Err(e);
                }
                if attempt >= max {
                    warn!(attempts = attempt, error = %e, "retry: all attempts exhausted");
                    return Err(e);
                }

                let delay = policy.delay_after(attempt);
                debug!(
                    attempt,
                    max,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "retry: waiting before next attempt"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
