//! Retry logic with exponential backoff
//!
//! Transient failures during discovery and transfer are retried with exponential
//! backoff and optional jitter. `max_attempts` counts every attempt, including the
//! first one. Backoff sleeps are cancellable: a pause or shutdown during a sleep
//! surfaces as [`Error::Cancelled`] immediately instead of after the delay.
//!
//! # Example
//!
//! ```no_run
//! use sideload_dl::retry::{IsRetryable, download_with_retry};
//! use sideload_dl::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Cancelled,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//!     fn cancelled() -> Self {
//!         MyError::Cancelled
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! download_with_retry(&config, &cancel, || async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, FailureKind};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// The error to return when a backoff sleep is interrupted by cancellation
    fn cancelled() -> Self;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        self.kind() == FailureKind::Retryable
    }

    fn cancelled() -> Self {
        Error::Cancelled
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Returns the successful result, the first non-retryable error, or the last
/// retryable error once `config.max_attempts` attempts have been made.
pub async fn download_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::select! {
                    _ = cancel.cancelled() => return Err(E::cancelled()),
                    _ = tokio::time::sleep(jittered_delay) => {}
                }

                attempt += 1;
                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "operation failed after all retry attempts exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay lands between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
