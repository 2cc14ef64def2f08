//! Retry logic with exponential backoff
//!
//! Used by the registry when two writers race for the same auto-assigned
//! version number, and for transient storage failures such as a locked
//! SQLite database or a dropped PostgreSQL connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use featurelens_core::retry::{RetryPolicy, retry_async};
//!
//! let policy = RetryPolicy::default();
//! let view = retry_async(&policy, || async {
//!     backend.insert_feature_view(&draft).await
//! }).await?;
//! ```

use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,

    /// Initial backoff delay
    pub initial_delay: Duration,

    /// Maximum backoff delay (caps exponential growth)
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (typically 2.0)
    pub backoff_multiplier: f64,

    /// Random jitter applied to each delay (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// More attempts with shorter delays, for version allocation races
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    /// Calculate backoff delay for a given attempt
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        // random factor between (1 - jitter) and (1 + jitter)
        let jitter = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * self.jitter_factor;
        let final_delay = (capped_delay * jitter) as u64;

        Duration::from_millis(final_delay)
    }
}

/// Retry error - wraps the original error with retry metadata
#[derive(Debug)]
pub struct RetryError<E> {
    pub error: E,
    pub attempts: usize,
    pub total_delay: Duration,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.error
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Operation failed after {} attempts (total delay: {:?}): {}",
            self.attempts, self.total_delay, self.error
        )
    }
}

impl<E: std::error::Error> std::error::Error for RetryError<E> {}

/// Whether retrying the operation that produced `error` can succeed
pub fn is_retryable(error: &crate::Error) -> bool {
    match error {
        crate::Error::StorageError(e) => {
            let error_str = format!("{:#}", e).to_lowercase();
            error_str.contains("connection")
                || error_str.contains("timeout")
                || error_str.contains("timed out")
                || error_str.contains("busy")
                || error_str.contains("locked")
                || error_str.contains("temporary")
                || error_str.contains("unavailable")
        }

        // Lost a race for an auto-assigned version
        crate::Error::DuplicateNameVersion { .. } => true,

        _ => false,
    }
}

/// Retry an async operation with exponential backoff
///
/// Every error is retried; callers that only want to retry some errors
/// return `Ok(Err(e))` for the rest, see [`retry_if`].
pub async fn retry_async<F, Fut, T, E>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0;
    let mut total_delay = Duration::from_secs(0);

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        "Operation succeeded after {} attempts (total delay: {:?})",
                        attempts, total_delay
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts > policy.max_retries {
                    warn!(
                        "Operation failed after {} attempts (total delay: {:?}): {}",
                        attempts, total_delay, error
                    );
                    return Err(RetryError {
                        error,
                        attempts,
                        total_delay,
                    });
                }

                let delay = policy.backoff_delay(attempts - 1);
                total_delay += delay;

                debug!(
                    "Operation failed (attempt {}/{}), retrying after {:?}: {}",
                    attempts,
                    policy.max_retries + 1,
                    delay,
                    error
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retries `operation` while it fails with an error accepted by `should_retry`
pub async fn retry_if<F, Fut, T, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut operation: F,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
    P: Fn(&crate::Error) -> bool,
{
    let outcome = retry_async(policy, || {
        let attempt = operation();
        let should_retry = &should_retry;
        async move {
            match attempt.await {
                Ok(value) => Ok(Ok(value)),
                Err(e) if should_retry(&e) => Err(e),
                Err(e) => Ok(Err(e)),
            }
        }
    })
    .await;

    match outcome {
        Ok(inner) => inner,
        Err(retry_error) => Err(retry_error.into_inner()),
    }
}
