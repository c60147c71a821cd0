//! Generic retry executor with backoff between attempts.
//!
//! The executor makes attempts strictly sequentially: attempt N+1 never
//! starts before attempt N has resolved and the backoff delay has elapsed.
//! The only terminal outcomes are the resolved value or the last observed
//! error, returned as-is. Exhaustion never wraps the upstream error in a
//! synthetic one.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::UpstreamError;

use super::backoff;
use super::classify::Transient;
use super::ConfigError;

/// Decides whether a failed attempt should be retried.
pub trait RetryPolicy<E> {
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn should_retry(&self, error: &E, attempt: u32) -> bool;
}

impl<E, F> RetryPolicy<E> for F
where
    F: Fn(&E, u32) -> bool,
{
    fn should_retry(&self, error: &E, attempt: u32) -> bool {
        self(error, attempt)
    }
}

/// Retry behavior for one invocation.
///
/// Immutable once built; per-call overrides start from [`RetryConfig::default`]
/// via the builder.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempt ceiling, including the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Clamp applied to the exponential delay, before jitter.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("max_retries must be at least 1"));
        }
        if self.backoff_multiplier <= 1.0 {
            return Err(ConfigError::invalid("backoff_multiplier must be greater than 1"));
        }
        Ok(())
    }
}

/// Fluent builder over [`RetryConfig::default`].
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.config.max_retries = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Run `operation` up to `config.max_retries` times, consulting `policy`
/// between attempts.
///
/// A non-retryable error is returned immediately; a retryable error on the
/// final attempt is returned as-is. Each retry waits the jittered
/// exponential backoff for the attempt that just failed.
pub async fn retry_with_policy<T, E, P, F, Fut>(
    config: &RetryConfig,
    policy: &P,
    mut operation: F,
) -> Result<T, E>
where
    P: RetryPolicy<E>,
    E: fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(error) => {
                if !policy.should_retry(&error, attempt) {
                    debug!(error = ?error, "error is not retryable, failing fast");
                    return Err(error);
                }
                if attempt >= config.max_retries {
                    warn!(error = ?error, attempts = attempt, "retry attempts exhausted");
                    return Err(error);
                }
                let delay = backoff::delay_for(config, attempt);
                warn!(
                    error = ?error,
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Retry a backend call with the default configuration and the transient
/// classification.
pub async fn with_retry<T, F, Fut>(operation: F) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    with_retry_config(&RetryConfig::default(), operation).await
}

/// [`with_retry`] with an explicit configuration.
pub async fn with_retry_config<T, F, Fut>(
    config: &RetryConfig,
    operation: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    retry_with_policy(config, &Transient, operation).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn default_config_matches_policy() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.backoff_multiplier, 2.0);
    }

    #[test]
    fn builder_overrides_merge_onto_defaults() {
        let config = RetryConfig::builder()
            .max_retries(5)
            .base_delay(Duration::from_millis(50))
            .build()
            .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay, Duration::from_millis(50));
        // Untouched fields keep their defaults.
        assert_eq!(config.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        assert!(RetryConfig::builder().max_retries(0).build().is_err());
        assert!(RetryConfig::builder().backoff_multiplier(1.0).build().is_err());
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = with_retry_config(&fast_config(3), || {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(UpstreamError::status(503, "unavailable"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error_unwrapped() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), _> = with_retry_config(&fast_config(3), || {
            let calls = Arc::clone(&calls_clone);
            async move {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(UpstreamError::status(500, format!("boom {attempt}")))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // The error from the final attempt comes back as-is.
        assert_eq!(result.unwrap_err(), UpstreamError::status(500, "boom 3"));
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), _> = with_retry_config(&fast_config(5), || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(UpstreamError::status(401, "unauthorized"))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.unwrap_err().is_auth());
    }

    #[tokio::test]
    async fn closure_policies_see_the_attempt_number() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let policy = |_: &UpstreamError, attempt: u32| attempt < 2;

        let result: Result<(), _> = retry_with_policy(&fast_config(10), &policy, || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(UpstreamError::network("down"))
            }
        })
        .await;

        assert!(result.is_err());
        // Attempt 1 is retried, attempt 2 is not.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
