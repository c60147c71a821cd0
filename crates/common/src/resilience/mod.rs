//! Resilience layer for calls against the backend service.
//!
//! Everything here wraps an arbitrary asynchronous action reaching the
//! backend and shapes how failures propagate:
//! - **Retry**: exponential backoff with jitter, driven by a closed transient
//!   classification ([`classify`], [`retry`], [`backoff`])
//! - **Adapters**: `data + error` shaped backend calls normalized into plain
//!   `Result`s, with empty results made explicit ([`adapters`])
//! - **Rate limiting**: sliding-window admission control per key
//!   ([`rate_limiter`])
//! - **Circuit breaking**: three-state failure isolation per upstream
//!   dependency ([`circuit_breaker`])
//! - **Call-rate shaping**: debounce/throttle helpers for event handlers
//!   ([`throttle`])
//! - **Health**: round-trip latency probe ([`health`])
//!
//! All state is held in explicit, constructible instances. Callers wire one
//! rate limiter and one circuit breaker per logical upstream dependency;
//! nothing here is a process-wide singleton.
//!
//! None of these primitives expose cancellation: dropping a returned future
//! abandons the call but does not abort an in-flight backoff timer or the
//! wrapped action.

use thiserror::Error;

pub mod adapters;
pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod health;
pub mod rate_limiter;
pub mod retry;
pub mod throttle;

/// Configuration validation error shared by the builders in this module.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

pub use adapters::{
    batch_queries, mutate_with_retry, mutate_with_retry_config, query_with_retry,
    query_with_retry_config, safe_query, safe_query_with, with_rollback, BackendOutcome,
};
pub use backoff::{delay_for, raw_delay, MAX_JITTER};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerSnapshot,
    CircuitError, CircuitState,
};
pub use classify::{is_transient, Transient, RETRYABLE_BACKEND_CODES, RETRYABLE_STATUS_CODES};
pub use health::{check_connection_health, ConnectionHealth};
pub use rate_limiter::{
    SlidingWindowConfig, SlidingWindowConfigBuilder, SlidingWindowLimiter, DEFAULT_KEY,
};
pub use retry::{
    retry_with_policy, with_retry, with_retry_config, RetryConfig, RetryConfigBuilder, RetryPolicy,
};
pub use throttle::{Debouncer, Throttler};
