//! Bounded retry around the remote fetch step.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_SECS};
use crate::errors::GitError;
use crate::models::FetchStatus;

/// How often and how patiently a fetch is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never zero.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RETRY_COUNT,
            Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        )
    }
}

/// All attempts failed, or one failed with a non-retryable error.
#[derive(Debug)]
pub struct FetchExhausted {
    pub attempts: u32,
    pub error: GitError,
}

/// Run `fetch` until it succeeds or `policy` is exhausted.
///
/// `fetch` receives the 1-based attempt number. Both [`FetchStatus`]
/// variants count as success, so "already up to date" ends the loop at
/// whatever attempt it arrives.
pub async fn fetch_with_retry<F, Fut>(
    policy: &RetryPolicy,
    mut fetch: F,
) -> Result<FetchStatus, FetchExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<FetchStatus, GitError>>,
{
    let mut attempt = 1;
    loop {
        match fetch(attempt).await {
            Ok(status) => {
                debug!(attempt, ?status, "fetch succeeded");
                return Ok(status);
            }
            Err(error) if attempt < policy.max_attempts && error.is_retryable() => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %error,
                    "fetch failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(error) => return Err(FetchExhausted { attempts: attempt, error }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> GitError {
        GitError::IoError(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ))
    }

    #[test]
    fn test_policy_never_zero_attempts() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
        assert_eq!(RetryPolicy::default().max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        let started = tokio::time::Instant::now();

        let result = fetch_with_retry(&policy, move |_| async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(transient())
            } else {
                Ok(FetchStatus::Updated)
            }
        })
        .await;

        assert_eq!(result.unwrap(), FetchStatus::Updated);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        // Two pauses between three attempts.
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_exhausts_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_secs(1));

        let result = fetch_with_retry(&policy, move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_up_to_date_short_circuits() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::from_secs(1));

        let result = fetch_with_retry(&policy, move |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 1 {
                    Err(transient())
                } else {
                    Ok(FetchStatus::UpToDate)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), FetchStatus::UpToDate);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_secs(1));

        let result = fetch_with_retry(&policy, move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GitError::RemoteNotFound("origin".into()))
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
