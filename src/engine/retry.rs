//! engine::retry
//!
//! Bounded timeouts and retries for remote calls.
//!
//! # Rules
//!
//! - Every remote call runs under [`RetryPolicy::timeout`]; an elapsed
//!   timeout is a `Transient` error
//! - Only `Transient` errors are retried, with exponential backoff, up to
//!   `max_attempts` attempts in total
//! - Calls that create something the caller cannot see or undo (an access
//!   key, a principal) go through [`RetryPolicy::once`] and are never
//!   repeated
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use keyrelay::core::error::ApiError;
//! use keyrelay::engine::retry::RetryPolicy;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::new(3, Duration::ZERO, Duration::from_secs(1));
//! let mut calls = 0;
//! let result: Result<u32, ApiError> = policy
//!     .run("example", || {
//!         calls += 1;
//!         let attempt = calls;
//!         async move {
//!             if attempt < 3 {
//!                 Err(ApiError::Transient("503".into()))
//!             } else {
//!                 Ok(attempt)
//!             }
//!         }
//!     })
//!     .await;
//! assert_eq!(result.unwrap(), 3);
//! # });
//! ```

use std::future::Future;
use std::time::Duration;

use crate::core::config::RetrySettings;
use crate::core::error::ApiError;

/// Upper bound on a single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Timeout and retry settings applied to remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    /// Build a policy. `max_attempts` below one is treated as one.
    pub fn new(max_attempts: u32, base_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            timeout,
        }
    }

    /// Attempts per call, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Run a single attempt under the timeout. Never retries.
    pub async fn once<T, Fut>(&self, operation: &str, call: Fut) -> Result<T, ApiError>
    where
        Fut: Future<Output = Result<T, ApiError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Transient(format!(
                "{} timed out after {}s",
                operation,
                self.timeout.as_secs_f64()
            ))),
        }
    }

    /// Run `call` until it succeeds, fails with a non-transient error, or
    /// the attempts are used up.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 1;
        loop {
            match self.once(operation, call()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self::new(settings.max_attempts, settings.base_delay, settings.timeout)
    }
}
