//! Time abstraction so timing-sensitive state machines stay testable.
//!
//! The rate limiter, circuit breaker, and location tracker all make
//! decisions based on elapsed time. They take a [`Clock`] so production code
//! runs on [`SystemClock`] while tests drive a [`MockClock`] forward without
//! real delays.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Current wall-clock time.
    fn system_time(&self) -> SystemTime;

    /// Milliseconds since the Unix epoch.
    fn millis_since_epoch(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

/// Real system clock used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same offset, so a test can hold one clone and advance
/// time for a component holding another.
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), offset: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += duration;
        }
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the total elapsed time since the clock was created.
    pub fn set_elapsed(&self, duration: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset = duration;
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.offset.lock().map(|offset| *offset).unwrap_or(Duration::ZERO)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + self.elapsed()
    }
}
