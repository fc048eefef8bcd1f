//! Failure classification and exponential backoff
//!
//! Task failures are classified by *error kind* against the configured
//! allow-list ([`RetryConfig::retry_on_errors`]). The delay before the n-th
//! retry (n counted from 0) is `interval * backoff_factor^n`, optionally
//! stretched by jitter.
//!
//! # Example
//!
//! ```no_run
//! use fare_crawler::config::RetryConfig;
//! use fare_crawler::retry::with_retry;
//! use fare_crawler::Error;
//!
//! # async fn example() -> Result<(), Error> {
//! let policy = RetryConfig::default();
//! let body = with_retry(&policy, || async {
//!     Ok::<_, Error>("holiday calendar".to_string())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::any::Any;
use std::future::Future;
use std::time::Duration;

/// Errors that can be classified for the retry policy
pub trait IsRetryable {
    /// Error-kind name matched against `retry_on_errors`
    fn error_kind(&self) -> &str;

    /// Malformed-task faults are never retried
    fn is_malformed_task(&self) -> bool {
        false
    }

    /// Whether `policy` allows retrying this error
    fn is_retryable(&self, policy: &RetryConfig) -> bool {
        !self.is_malformed_task() && policy.retries_on(self.error_kind())
    }
}

impl IsRetryable for Error {
    fn error_kind(&self) -> &str {
        self.kind()
    }

    fn is_malformed_task(&self) -> bool {
        Error::is_malformed_task(self)
    }
}

/// A failed attempt, as reported to the retry decision
///
/// Carries the error kind and message rather than the error itself, so that
/// reported errors and caught panics travel the same path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskFailure {
    kind: String,
    message: String,
    malformed: bool,
}

impl TaskFailure {
    /// Failure with an explicit kind and message
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            malformed: false,
        }
    }

    /// Build from a panic payload caught at the worker boundary
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "callback panicked".to_string()
        };
        Self::from(&Error::TaskPanicked(message))
    }

    /// Error-kind name
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Failure message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&Error> for TaskFailure {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            malformed: error.is_malformed_task(),
        }
    }
}

impl From<Error> for TaskFailure {
    fn from(error: Error) -> Self {
        Self::from(&error)
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl IsRetryable for TaskFailure {
    fn error_kind(&self) -> &str {
        &self.kind
    }

    fn is_malformed_task(&self) -> bool {
        self.malformed
    }
}

impl RetryConfig {
    /// Whether `kind` is on the allow-list
    pub fn retries_on(&self, kind: &str) -> bool {
        self.retry_on_errors.iter().any(|k| k == kind)
    }

    /// Delay before the retry that follows `retry_count` earlier retries
    ///
    /// Never shorter than `interval * backoff_factor^retry_count`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let secs = self.interval.as_secs_f64() * self.backoff_factor.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);

        if self.jitter { add_jitter(delay) } else { delay }
    }
}

/// Execute an async operation inline, retrying allow-listed failures
///
/// Used for auxiliary lookups (such as the holiday calendar) that are not
/// scheduled tasks themselves. Makes at most `max_attempts + 1` calls.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable(policy) && attempt < policy.max_attempts => {
                let delay = policy.backoff_delay(attempt);
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable(policy) {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        kind = e.error_kind(),
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Jitter is uniform between 0% and 100% of the delay, so the result lies
/// between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}
