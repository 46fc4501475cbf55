//! The 429/5xx retry-with-backoff loop every adapter's HTTP call goes
//! through. The 401/403-triggers-one-refresh path is deliberately *not*
//! part of this loop — adapters wrap a single call in their own
//! refresh-then-retry branch around `retry_with_backoff`, so an auth
//! refresh never eats into the retry budget meant for transient upstream
//! failures.

use std::time::Duration;

use crate::errors::{ProviderError, ProviderResult, UpstreamFailure};

pub const REQUEST_MAX_RETRIES: u32 = 3;
pub const REQUEST_BASE_DELAY: Duration = Duration::from_millis(1000);

fn is_retryable(failure: &UpstreamFailure) -> bool {
    match failure {
        UpstreamFailure::Http { status, .. } => *status == 429 || (500..600).contains(status),
        UpstreamFailure::Transport { .. } => true,
    }
}

/// Retries `attempt` up to `REQUEST_MAX_RETRIES` times on a retryable
/// `UpstreamFailure`, sleeping `base * 2^attempt` between tries. Any other
/// `ProviderError`, or a retryable failure on the last attempt, is
/// returned to the caller.
pub async fn retry_with_backoff<T, F, Fut>(attempt: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ProviderResult<T>>,
{
    retry_with_backoff_params(REQUEST_MAX_RETRIES, REQUEST_BASE_DELAY, attempt).await
}

/// Same loop with an explicit retry budget and base delay, for adapters
/// that plumb the configured `request-max-retries`/`request-base-delay`
/// values through instead of using the default.
pub async fn retry_with_backoff_params<T, F, Fut>(
    max_retries: u32,
    base_delay: Duration,
    mut attempt: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ProviderResult<T>>,
{
    let mut last_err = None;
    for attempt_no in 0..=max_retries {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(ProviderError::Upstream(failure)) if is_retryable(&failure) => {
                last_err = Some(ProviderError::Upstream(failure));
                if attempt_no < max_retries {
                    let delay = base_delay * 2u32.pow(attempt_no);
                    tokio::time::sleep(delay).await;
                }
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_err.unwrap_or_else(|| ProviderError::Other("retry loop exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff_params(3, Duration::from_millis(1), || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ProviderError::Upstream(UpstreamFailure::Http {
                    status: 503,
                    body: bytes::Bytes::new(),
                }))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_status_returns_immediately() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff_params(3, Duration::from_millis(1), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ProviderError::Upstream(UpstreamFailure::Http {
                status: 400,
                body: bytes::Bytes::new(),
            }))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
