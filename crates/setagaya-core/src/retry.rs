use std::future::Future;
use std::time::Duration;

use crate::error::ControllerError;

pub const RETRY_LIMIT: u32 = 5;
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Retry policy. Retries `op` up to `RETRY_LIMIT` times with a fixed
/// `RETRY_INTERVAL` between attempts, short-circuiting immediately if the
/// observed error is exempt (`ControllerError::is_exempt`). Panics inside
/// `op` are not caught — they propagate and abort the retry loop like any
/// other unwind.
pub async fn retry<F, Fut, T>(mut op: F) -> Result<T, ControllerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControllerError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_exempt() => return Err(err),
            Err(err) if attempt >= RETRY_LIMIT => return Err(err),
            Err(_) => {
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn exempt_error_short_circuits_after_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result = retry(move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ControllerError::FileNotFound("plan.jmx".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_exempt_persistent_error_retries_exactly_retry_limit_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result = retry(move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ControllerError::Transient("connection reset".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), RETRY_LIMIT);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result = retry(move || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ControllerError::Transient("not yet".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
