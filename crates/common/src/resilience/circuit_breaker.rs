//! Three-state circuit breaker for failure isolation.
//!
//! One breaker instance guards one logical upstream dependency. While the
//! circuit is open, calls are rejected with a distinct [`CircuitError::Open`]
//! without invoking the action. Callers must treat that differently from an
//! upstream failure, since it means the dependency is presumed unhealthy,
//! not that this particular call failed.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::time::{Clock, SystemClock};

use super::ConfigError;

/// Lifecycle states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow through; failures are counted.
    Closed,
    /// Requests are rejected without reaching the upstream.
    Open,
    /// One probe request is allowed through to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Failure reported by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The breaker is open; the action was never invoked.
    #[error("circuit breaker is open")]
    Open,

    /// The action ran and failed; the upstream error is preserved.
    #[error("upstream call failed")]
    Upstream {
        #[source]
        source: E,
    },
}

impl<E> CircuitError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The upstream error, when the action actually ran.
    pub fn into_upstream(self) -> Option<E> {
        match self {
            Self::Open => None,
            Self::Upstream { source } => Some(source),
        }
    }
}

/// Thresholds governing state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures required to open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a half-open probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(60) }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be at least 1"));
        }
        if self.reset_timeout.is_zero() {
            return Err(ConfigError::invalid("reset_timeout must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker's state, for diagnostics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}

/// Circuit breaker around an arbitrary asynchronous action.
///
/// Clones share state, so a cloned breaker still guards the same upstream.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    failure_count: Arc<AtomicU32>,
    last_failure: Arc<RwLock<Option<Instant>>>,
    clock: Arc<C>,
}

impl CircuitBreaker<SystemClock> {
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }

    /// Breaker with the default policy: 5 failures, 60 second reset.
    pub fn with_defaults() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_count: Arc::new(AtomicU32::new(0)),
            last_failure: Arc::new(RwLock::new(None)),
            clock: Arc::new(SystemClock),
        }
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_count: Arc::new(AtomicU32::new(0)),
            last_failure: Arc::new(RwLock::new(None)),
            clock: Arc::new(clock),
        })
    }

    /// Current state, recovering from a poisoned lock if needed.
    pub fn state(&self) -> CircuitState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned");
                *poisoned.into_inner()
            }
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: self.state(),
            failure_count: self.failure_count(),
            last_failure: self.last_failure.read().ok().and_then(|guard| *guard),
        }
    }

    fn set_state(&self, next: CircuitState) {
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned");
                *poisoned.into_inner() = next;
            }
        }
    }

    /// Whether a call may proceed, transitioning Open to HalfOpen when the
    /// reset timeout has elapsed since the last failure.
    fn can_execute(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let last = self.last_failure.read().ok().and_then(|guard| *guard);
                if let Some(last) = last {
                    if self.clock.now().duration_since(last) > self.config.reset_timeout {
                        self.set_state(CircuitState::HalfOpen);
                        debug!("circuit breaker half-open, probing upstream");
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Run `action` under the breaker.
    ///
    /// Rejects with [`CircuitError::Open`] without invoking the action when
    /// the circuit is open and the reset timeout has not elapsed. Otherwise
    /// the action runs; its outcome drives the state machine and failures
    /// come back as [`CircuitError::Upstream`].
    pub async fn execute<F, Fut, T, E>(&self, action: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if !self.can_execute() {
            debug!("circuit breaker open, rejecting call");
            return Err(CircuitError::Open);
        }

        match action().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(CircuitError::Upstream { source: error })
            }
        }
    }

    /// Record a success: zero the failure count and close the circuit.
    pub fn record_success(&self) {
        let probing = self.state() == CircuitState::HalfOpen;
        self.failure_count.store(0, Ordering::Release);
        self.set_state(CircuitState::Closed);
        if probing {
            info!("circuit breaker closed after successful probe");
        }
    }

    /// Record a failure, opening the circuit once the threshold is reached.
    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        if let Ok(mut guard) = self.last_failure.write() {
            *guard = Some(self.clock.now());
        }

        if failures >= self.config.failure_threshold {
            let was = self.state();
            self.set_state(CircuitState::Open);
            if was != CircuitState::Open {
                warn!(failures, "circuit breaker opened");
            }
        }
    }

    /// Force the breaker back to closed with no recorded failures.
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::Release);
        if let Ok(mut guard) = self.last_failure.write() {
            *guard = None;
        }
        self.set_state(CircuitState::Closed);
        info!("circuit breaker manually reset");
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            failure_count: Arc::clone(&self.failure_count),
            last_failure: Arc::clone(&self.last_failure),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .finish()
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}
