//! Sliding-window request admission control.
//!
//! Each key tracks the timestamps of requests admitted within the trailing
//! window; stamps older than the window are pruned lazily on every check.
//! The prune-then-record sequence runs synchronously under one lock, so no
//! interleaving can occur mid-check.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::time::{Clock, SystemClock};

use super::ConfigError;

/// Key used when callers do not partition their traffic.
pub const DEFAULT_KEY: &str = "default";

/// Admission policy for a [`SlidingWindowLimiter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindowConfig {
    /// Length of the trailing window.
    pub window: Duration,
    /// Maximum admissions per key within the window.
    pub max_requests: usize,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        // 100 requests per minute, matching the backend's documented limits.
        Self { window: Duration::from_secs(60), max_requests: 100 }
    }
}

impl SlidingWindowConfig {
    pub fn builder() -> SlidingWindowConfigBuilder {
        SlidingWindowConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::invalid("window must be greater than zero"));
        }
        if self.max_requests == 0 {
            return Err(ConfigError::invalid("max_requests must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SlidingWindowConfigBuilder {
    config: SlidingWindowConfig,
}

impl SlidingWindowConfigBuilder {
    pub fn new() -> Self {
        Self { config: SlidingWindowConfig::default() }
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    pub fn max_requests(mut self, max_requests: usize) -> Self {
        self.config.max_requests = max_requests;
        self
    }

    pub fn build(self) -> Result<SlidingWindowConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Sliding-window rate limiter keyed by an arbitrary string.
///
/// Clones share state, so one limiter instance can guard a logical upstream
/// across call sites. Callers needing isolation construct separate
/// instances.
pub struct SlidingWindowLimiter<C: Clock = SystemClock> {
    config: SlidingWindowConfig,
    admitted: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    clock: Arc<C>,
}

impl SlidingWindowLimiter<SystemClock> {
    pub fn new(config: SlidingWindowConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }

    /// Limiter with the default backend policy (100 requests per minute).
    pub fn with_defaults() -> Self {
        Self { config: SlidingWindowConfig::default(), admitted: Arc::default(), clock: Arc::new(SystemClock) }
    }
}

impl<C: Clock> SlidingWindowLimiter<C> {
    pub fn with_clock(config: SlidingWindowConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, admitted: Arc::default(), clock: Arc::new(clock) })
    }

    fn lock_admitted(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Instant>>> {
        match self.admitted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("rate limiter state lock poisoned");
                poisoned.into_inner()
            }
        }
    }

    /// Admit a request under `key` if the window has room.
    ///
    /// Prunes stamps older than the window, then either records the request
    /// and returns `true`, or returns `false` without mutating anything.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut admitted = self.lock_admitted();
        let stamps = admitted.entry(key.to_owned()).or_default();
        stamps.retain(|stamp| now.duration_since(*stamp) < self.config.window);

        if stamps.len() < self.config.max_requests {
            stamps.push(now);
            true
        } else {
            debug!(key, max_requests = self.config.max_requests, "rate limit window full");
            false
        }
    }

    /// [`try_acquire`](Self::try_acquire) under [`DEFAULT_KEY`].
    pub fn try_acquire_default(&self) -> bool {
        self.try_acquire(DEFAULT_KEY)
    }

    /// Wait until the oldest admitted request leaves the window.
    ///
    /// This does NOT admit a slot and does not re-check admission after the
    /// delay: another caller may take the freed slot first. Callers must call
    /// [`try_acquire`](Self::try_acquire) again after waiting.
    pub async fn wait_for_availability(&self, key: &str) {
        let wait = {
            let now = self.clock.now();
            let admitted = self.lock_admitted();
            admitted
                .get(key)
                .and_then(|stamps| stamps.first())
                .map(|oldest| (*oldest + self.config.window).saturating_duration_since(now))
        };

        if let Some(wait) = wait {
            if !wait.is_zero() {
                debug!(key, wait_ms = wait.as_millis() as u64, "waiting for rate limit window");
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Number of admissions still inside the window for `key`.
    pub fn admitted_in_window(&self, key: &str) -> usize {
        let now = self.clock.now();
        let mut admitted = self.lock_admitted();
        match admitted.get_mut(key) {
            Some(stamps) => {
                stamps.retain(|stamp| now.duration_since(*stamp) < self.config.window);
                stamps.len()
            }
            None => 0,
        }
    }

    /// Drop all recorded admissions for every key.
    pub fn reset(&self) {
        self.lock_admitted().clear();
    }
}

impl<C: Clock> Clone for SlidingWindowLimiter<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            admitted: Arc::clone(&self.admitted),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> std::fmt::Debug for SlidingWindowLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter").field("config", &self.config).finish()
    }
}
