//! Deadline wrapper for async operations

use std::future::Future;
use std::time::Duration;

use chrono::Utc;

use crate::error::{ResilienceError, ResilienceResult};

/// Run a future with a deadline, passing its value through on completion
///
/// On expiry the future is dropped and a timeout error naming the operation,
/// the configured limit, and the wall-clock start time is returned instead.
pub async fn with_timeout<F, T>(operation: &str, limit: Duration, future: F) -> ResilienceResult<T>
where
    F: Future<Output = T>,
{
    let started_at = Utc::now();
    match tokio::time::timeout(limit, future).await {
        Ok(value) => Ok(value),
        Err(_) => Err(ResilienceError::Timeout {
            operation: operation.to_string(),
            duration_ms: limit.as_millis() as u64,
            started_at,
        }),
    }
}

/// Like [`with_timeout`] for futures that already return a resilience result
///
/// The operation's own error passes through unchanged; only expiry is mapped
/// to a timeout error.
pub async fn try_with_timeout<F, T>(operation: &str, limit: Duration, future: F) -> ResilienceResult<T>
where
    F: Future<Output = ResilienceResult<T>>,
{
    let started_at = Utc::now();
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(ResilienceError::Timeout {
            operation: operation.to_string(),
            duration_ms: limit.as_millis() as u64,
            started_at,
        }),
    }
}

/// [`with_timeout`] with a best-effort cleanup hook fired on expiry
///
/// The cleanup future is spawned and forgotten; whatever it does or fails to
/// do never changes the timeout error the caller sees.
pub async fn with_timeout_cleanup<F, T, C, CFut>(
    operation: &str,
    limit: Duration,
    future: F,
    cleanup: C,
) -> ResilienceResult<T>
where
    F: Future<Output = T>,
    C: FnOnce() -> CFut,
    CFut: Future<Output = ()> + Send + 'static,
{
    let started_at = Utc::now();
    match tokio::time::timeout(limit, future).await {
        Ok(value) => Ok(value),
        Err(_) => {
            tokio::spawn(cleanup());
            Err(ResilienceError::Timeout {
                operation: operation.to_string(),
                duration_ms: limit.as_millis() as u64,
                started_at,
            })
        }
    }
}

/// Absolute-time variant of [`with_timeout`]
///
/// A deadline already in the past expires on the first poll.
pub async fn with_deadline<F, T>(
    operation: &str,
    deadline: tokio::time::Instant,
    future: F,
) -> ResilienceResult<T>
where
    F: Future<Output = T>,
{
    let limit = deadline.saturating_duration_since(tokio::time::Instant::now());
    let started_at = Utc::now();
    match tokio::time::timeout_at(deadline, future).await {
        Ok(value) => Ok(value),
        Err(_) => Err(ResilienceError::Timeout {
            operation: operation.to_string(),
            duration_ms: limit.as_millis() as u64,
            started_at,
        }),
    }
}
