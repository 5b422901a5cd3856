use engine_core::{CancelToken, EngineError, EngineResult};
use std::future::Future;
use std::time::Duration;

/// Retry policy for transient upstream failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
        }
    }
}

/// Run `op` with exponential backoff on transient failures (`RateLimited`,
/// `Upstream`). Non-transient errors and cancellation surface immediately;
/// the final transient error surfaces once attempts are exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancelToken,
    mut op: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err = EngineError::Internal("retry loop ran zero attempts".to_string());

    for attempt in 0..attempts {
        cancel.check()?;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                let backoff = Duration::from_millis(policy.backoff_base_ms << attempt);
                tracing::warn!(
                    "transient upstream failure (attempt {}/{}), backing off {:?}: {}",
                    attempt + 1,
                    attempts,
                    backoff,
                    err
                );
                last_err = err;
                if attempt + 1 < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_then_succeed() {
        let calls = AtomicU32::new(0);
        let result = with_retry(RetryPolicy::default(), &CancelToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngineError::Upstream("flaky".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> =
            with_retry(RetryPolicy::default(), &CancelToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::NotFound("XYZ".to_string())) }
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), "NotFound");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let result: EngineResult<()> =
            with_retry(RetryPolicy::default(), &CancelToken::new(), || async {
                Err(EngineError::RateLimited("429".to_string()))
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), "Upstream");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result: EngineResult<()> = with_retry(RetryPolicy::default(), &cancel, || async {
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
