use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{StoreError, is_transient};

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Run a query, retrying exactly once after a short delay if SQLite
/// reports a transient busy/locked condition.
pub(crate) async fn once<T, F, Fut>(op: F) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    match op().await {
        Err(err) if is_transient(&err) => {
            warn!(error = %err, "transient storage error, retrying once");
            tokio::time::sleep(RETRY_DELAY).await;
            op().await.map_err(StoreError::from)
        }
        other => other.map_err(StoreError::from),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn transient_error_is_retried_once() {
        let calls = AtomicUsize::new(0);
        let result = once(|| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(sqlx::Error::PoolTimedOut)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = once(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
