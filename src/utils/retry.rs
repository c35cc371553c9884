//! Retry logic with exponential backoff
//!
//! This module provides configurable retry functionality with
//! exponential backoff for handling transient failures.

use crate::error::{KeywardenError, Result};
use crate::utils::network::is_retryable_error;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Total number of attempts, including the first one.
    pub max_attempts: usize,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Invoke `operation` until it succeeds, fails with a non-retryable error,
/// or the attempt budget is exhausted.
///
/// Only errors classified retryable by [`is_retryable_error`] are retried;
/// anything else short-circuits immediately. The first attempt incurs no
/// delay. Cancellation is cooperative: every sleep and every await inside
/// the operation is a suspension point, and dropping the returned future
/// makes no further attempt.
pub async fn retry_with_backoff<T, F, Fut>(mut operation: F, options: RetryOptions) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    if options.max_attempts == 0 {
        return Err(KeywardenError::config("Retry policy allows zero attempts"));
    }

    let mut interval = options.initial_interval;
    let mut last_error = None;

    for attempt in 0..options.max_attempts {
        if attempt > 0 {
            sleep(interval).await;
            interval = std::cmp::min(
                Duration::from_secs_f64(interval.as_secs_f64() * options.multiplier),
                options.max_interval,
            );
        }

        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !is_retryable_error(&error) {
                    return Err(error);
                }
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| KeywardenError::unknown("Retry failed with no error")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick_options(max_attempts: usize) -> RetryOptions {
        RetryOptions {
            max_attempts,
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(100),
            multiplier: 2.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_no_backoff() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let result = retry_with_backoff(
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            },
            quick_options(4),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let result = retry_with_backoff(
            || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(KeywardenError::network("connection reset"))
                } else {
                    Ok("done")
                }
            },
            quick_options(4),
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_short_circuits() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let result: Result<()> = retry_with_backoff(
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(KeywardenError::authentication("invalid client secret"))
            },
            quick_options(4),
        )
        .await;

        assert!(matches!(result, Err(KeywardenError::AuthenticationError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let result: Result<()> = retry_with_backoff(
            || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(KeywardenError::network(format!("attempt {} failed", n)))
            },
            quick_options(3),
        )
        .await;

        match result {
            Err(KeywardenError::NetworkError(msg)) => assert!(msg.contains("attempt 2")),
            other => panic!("expected network error, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_fails_without_invoking() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let result: Result<()> = retry_with_backoff(
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            quick_options(0),
        )
        .await;

        assert!(matches!(result, Err(KeywardenError::ConfigError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
