use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::{IsRetryable, LoaderError};

/// Calls `f` until it succeeds, fails with a non-retryable error, or `cancel` fires.
pub async fn call_until_success_or_nonretryable_error<F, T, Fut>(
    f: F,
    action: &str,
    retry_delay: Duration,
    cancel: &CancellationToken,
) -> Result<T, LoaderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LoaderError>>,
{
    loop {
        let err = match f().await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };
        if !err.is_retryable() {
            return Err(LoaderError::NonRetryableError(err.to_string()));
        }
        error!(?err, ?action, "Error making call. Retrying...");
        tokio::select! {
            _ = cancel.cancelled() => return Err(LoaderError::Cancelled),
            _ = sleep(retry_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let result = call_until_success_or_nonretryable_error(
            || {
                let attempts = attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(LoaderError::NetworkError("refused".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            },
            "connect",
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stops_on_nonretryable_error() {
        let result: Result<(), _> = call_until_success_or_nonretryable_error(
            || async { Err(LoaderError::ConfigError("bad url".to_string())) },
            "connect",
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(LoaderError::NonRetryableError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_cancellation() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let result: Result<(), _> = call_until_success_or_nonretryable_error(
            || async { Err(LoaderError::NetworkError("refused".to_string())) },
            "connect",
            Duration::from_millis(100),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(LoaderError::Cancelled)));
    }
}
