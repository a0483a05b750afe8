//! Bounded fixed-delay retry for remote calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::TaskDeckError;
use crate::remote::RemoteError;

/// How many extra attempts a failing call gets, and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Single attempt, no retry.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, Duration::from_millis(500))
    }
}

/// Run `call` until it succeeds, fails permanently, or runs out of retries.
///
/// Only [`RemoteError::Transient`] is retried. `NotFound`, `Duplicate`, and
/// `Rejected` fail on the first attempt since another try would see the same
/// answer.
///
/// # Errors
///
/// Returns the last failure mapped through [`TaskDeckError::from_remote`].
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, TaskDeckError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt <= policy.retries => {
                warn!(
                    operation,
                    attempt,
                    remaining = policy.retries + 1 - attempt,
                    error = %err,
                    "remote call failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(err) => return Err(TaskDeckError::from_remote(operation, attempt, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(RetryPolicy::new(2, Duration::from_millis(500)), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RemoteError::Transient("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempt_count() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<(), _> =
            with_retry(RetryPolicy::new(1, Duration::from_millis(500)), "op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Transient("down".into())) }
            })
            .await;

        assert!(matches!(
            result,
            Err(TaskDeckError::Transient { attempts: 2, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_never_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(RetryPolicy::new(3, Duration::from_secs(1)), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RemoteError::NotFound {
                    entity: "task",
                    id: "td-x".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(TaskDeckError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
