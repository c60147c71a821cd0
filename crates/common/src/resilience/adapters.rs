//! Adapters from `data + error` shaped backend calls to plain `Result`s.
//!
//! The backend client resolves every call to a two-variant outcome:
//! `Ok(Some(data))`, `Ok(None)` for a success that carried no rows, or
//! `Err` with the backend's error. The adapters surface the error variant
//! inside each retry attempt so the transient classification can inspect
//! it, and turn `Ok(None)` into an explicit [`UpstreamError::EmptyResult`].
//! An empty result is not in the transient allow-list, so it fails fast;
//! retrying an unexpectedly empty read rarely helps.

use std::future::Future;

use futures::future::join_all;
use tracing::{error, warn};

use crate::error::UpstreamError;

use super::retry::{self, RetryConfig};

/// Outcome of one backend call, as the backend client reports it.
pub type BackendOutcome<T> = Result<Option<T>, UpstreamError>;

async fn run_with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &'static str,
    mut call: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendOutcome<T>>,
{
    retry::with_retry_config(config, || {
        let outcome = call();
        async move {
            match outcome.await {
                Ok(Some(data)) => Ok(data),
                Ok(None) => Err(UpstreamError::empty_result(operation)),
                Err(err) => Err(err),
            }
        }
    })
    .await
}

/// Run a backend query with the default retry configuration.
pub async fn query_with_retry<T, F, Fut>(query: F) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendOutcome<T>>,
{
    run_with_retry(&RetryConfig::default(), "query", query).await
}

/// [`query_with_retry`] with an explicit retry configuration.
pub async fn query_with_retry_config<T, F, Fut>(
    config: &RetryConfig,
    query: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendOutcome<T>>,
{
    run_with_retry(config, "query", query).await
}

/// Run a backend mutation with the default retry configuration.
pub async fn mutate_with_retry<T, F, Fut>(mutation: F) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendOutcome<T>>,
{
    run_with_retry(&RetryConfig::default(), "mutation", mutation).await
}

/// [`mutate_with_retry`] with an explicit retry configuration.
pub async fn mutate_with_retry_config<T, F, Fut>(
    config: &RetryConfig,
    mutation: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendOutcome<T>>,
{
    run_with_retry(config, "mutation", mutation).await
}

/// Query that never fails: retries first, then falls back to `default`.
///
/// Any failure left after the retry loop is logged and swallowed. This is
/// the only adapter that swallows errors; use it for reads where a stale or
/// empty fallback is acceptable.
pub async fn safe_query<T, F, Fut>(query: F, default: T) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendOutcome<T>>,
{
    safe_query_with(query, default, |err| error!(error = %err, "query failed, using default")).await
}

/// [`safe_query`] with a caller-supplied error callback instead of the log.
pub async fn safe_query_with<T, F, Fut, H>(query: F, default: T, on_error: H) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendOutcome<T>>,
    H: FnOnce(&UpstreamError),
{
    match query_with_retry(query).await {
        Ok(data) => data,
        Err(err) => {
            on_error(&err);
            default
        }
    }
}

/// Run a multi-step backend action, invoking `on_rollback` when it fails.
///
/// The rollback callback compensates for partial work (undoing optimistic
/// state, releasing a reservation); the error itself is propagated
/// unchanged. No retries happen here: compensating work must not be
/// replayed blindly.
pub async fn with_rollback<T, F, Fut, R>(action: F, on_rollback: R) -> Result<T, UpstreamError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
    R: FnOnce(&UpstreamError),
{
    match action().await {
        Ok(value) => Ok(value),
        Err(err) => {
            warn!(error = %err, "action failed, running rollback");
            on_rollback(&err);
            Err(err)
        }
    }
}

/// Run independent backend calls concurrently, collecting each outcome.
///
/// One failing call does not affect the others; the result vector is in the
/// same order as the input.
pub async fn batch_queries<T, F, Fut>(queries: Vec<F>) -> Vec<Result<T, UpstreamError>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    join_all(queries.into_iter().map(|query| query())).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn query_unwraps_data() {
        let result = query_with_retry(|| async { Ok(Some(41)) }).await;
        assert_eq!(result.unwrap(), 41);
    }

    #[tokio::test]
    async fn empty_result_becomes_explicit_error_without_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<i32, _> = query_with_retry_config(&fast_config(), || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), UpstreamError::empty_result("query"));
        // Not in the transient allow-list, so the loop stops immediately.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backend_error_is_surfaced_to_the_classifier() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = mutate_with_retry_config(&fast_config(), || {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(UpstreamError::backend("57014", "pool exhausted"))
                } else {
                    Ok(Some("written"))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "written");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn safe_query_resolves_on_success() {
        let value = safe_query(|| async { Ok(Some(10)) }, 0).await;
        assert_eq!(value, 10);
    }

    #[tokio::test]
    async fn safe_query_never_fails() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = Arc::clone(&seen);

        let value = safe_query_with(
            || async { Err::<Option<i32>, _>(UpstreamError::status(400, "bad request")) },
            -1,
            |err| {
                assert!(err.is_validation());
                seen_clone.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(value, -1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rollback_runs_only_on_failure() {
        let rollbacks = Arc::new(AtomicU32::new(0));

        let rollbacks_clone = Arc::clone(&rollbacks);
        let result = with_rollback(
            || async { Ok(5) },
            |_| {
                rollbacks_clone.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(rollbacks.load(Ordering::SeqCst), 0);

        let rollbacks_clone = Arc::clone(&rollbacks);
        let result: Result<i32, _> = with_rollback(
            || async { Err(UpstreamError::status(500, "insert failed")) },
            |err| {
                assert_eq!(err.http_status(), Some(500));
                rollbacks_clone.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        // The error comes back unchanged after the rollback ran.
        assert_eq!(result.unwrap_err(), UpstreamError::status(500, "insert failed"));
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_preserves_order_and_isolates_failures() {
        let queries: Vec<_> = (0..3)
            .map(|i| {
                move || async move {
                    if i == 1 {
                        Err(UpstreamError::network("down"))
                    } else {
                        Ok(i * 10)
                    }
                }
            })
            .collect();

        let results = batch_queries(queries).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Ok(0));
        assert!(results[1].is_err());
        assert_eq!(results[2], Ok(20));
    }
}
