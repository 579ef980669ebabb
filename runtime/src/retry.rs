//! Retry-guarded execution of persistence calls.
//!
//! A [`RetryGateway`] runs a fallible async operation and decides what to do
//! with each failure from its [`ErrorClass`]:
//!
//! - **Transient**: retried up to [`RetryPolicy::max_attempts`] total attempts
//! - **Cancelled** and **Terminal**: returned immediately
//!
//! Both attempts and backoff sleeps observe the gateway's abort token. Once it
//! fires, the gateway abandons the operation and returns
//! [`PipelineError::Cancelled`] converted into the caller's error type.
//!
//! # Example
//!
//! ```rust
//! use snapshare_core::PipelineError;
//! use snapshare_runtime::retry::{RetryGateway, RetryPolicy};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), PipelineError> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .build();
//! let gateway = RetryGateway::new(policy, CancellationToken::new());
//!
//! let rows = gateway
//!     .run("increment_like_count", || async { Ok::<_, PipelineError>(1) })
//!     .await?;
//! assert_eq!(rows, 1);
//! # Ok(())
//! # }
//! ```

use metrics::counter;
use snapshare_core::{Classify, ErrorClass, PipelineError};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry policy configuration.
///
/// # Default Values
///
/// - `max_attempts`: 3 (the first call plus two retries)
/// - `initial_delay`: 500ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 1.0 (fixed backoff)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first
    pub max_attempts: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap for the backoff delay
    pub max_delay: Duration,
    /// Backoff multiplier applied per retry
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Delay before retry number `retry` (zero-based).
    ///
    /// `initial_delay * multiplier^retry`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, retry: usize) -> Duration {
        if retry == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set the total number of attempts.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the backoff cap.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`]. At least one attempt is always made.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(3).max(1),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(500)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(30)),
            multiplier: self.multiplier.unwrap_or(1.0),
        }
    }
}

/// Runs operations under a [`RetryPolicy`], interruptible by an abort token.
#[derive(Debug, Clone)]
pub struct RetryGateway {
    policy: RetryPolicy,
    abort: CancellationToken,
}

impl RetryGateway {
    /// Create a gateway. Cancelling `abort` interrupts any attempt or backoff in
    /// progress.
    #[must_use]
    pub const fn new(policy: RetryPolicy, abort: CancellationToken) -> Self {
        Self { policy, abort }
    }

    /// The policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation`, classifying failures with [`Classify`].
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, the last transient error once
    /// attempts are exhausted, or [`PipelineError::Cancelled`] once the abort
    /// token fires.
    pub async fn run<F, Fut, T, E>(&self, name: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display + From<PipelineError>,
    {
        self.run_classified(name, operation, |err: &E| err.class())
            .await
    }

    /// Run `operation`, classifying failures with `classify`.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, the last transient error once
    /// attempts are exhausted, or [`PipelineError::Cancelled`] once the abort
    /// token fires.
    pub async fn run_classified<F, Fut, T, E, C>(
        &self,
        name: &str,
        mut operation: F,
        classify: C,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + From<PipelineError>,
        C: Fn(&E) -> ErrorClass,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = tokio::select! {
                biased;
                () = self.abort.cancelled() => {
                    tracing::warn!(operation = name, attempt, "Attempt aborted, giving up");
                    counter!("persistence_failures_total", "class" => "aborted").increment(1);
                    return Err(PipelineError::Cancelled.into());
                }
                outcome = operation() => outcome,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation = name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            match classify(&err) {
                ErrorClass::Cancelled => {
                    tracing::debug!(operation = name, attempt, "Operation cancelled");
                    return Err(err);
                }
                ErrorClass::Terminal => {
                    tracing::warn!(
                        operation = name,
                        error = %err,
                        "Error is not retryable, failing immediately"
                    );
                    counter!("persistence_failures_total", "class" => "terminal").increment(1);
                    return Err(err);
                }
                ErrorClass::Transient => {}
            }

            if attempt >= max_attempts {
                tracing::error!(
                    operation = name,
                    attempts = attempt,
                    error = %err,
                    "Operation failed after max attempts"
                );
                counter!("persistence_failures_total", "class" => "exhausted").increment(1);
                return Err(err);
            }

            let delay = self.policy.delay_for_attempt(attempt - 1);
            tracing::warn!(
                operation = name,
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Transient failure, retrying"
            );
            counter!("persistence_retries_total").increment(1);

            tokio::select! {
                biased;
                () = self.abort.cancelled() => {
                    tracing::warn!(
                        operation = name,
                        attempt,
                        error = %err,
                        "Backoff aborted, giving up"
                    );
                    counter!("persistence_failures_total", "class" => "aborted").increment(1);
                    return Err(PipelineError::Cancelled.into());
                }
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
