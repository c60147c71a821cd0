//! Call-rate shaping for event handlers.
//!
//! [`Debouncer`] collapses a burst of calls into one trailing invocation
//! with the latest arguments. [`Throttler`] lets the first call of a window
//! through immediately and replays the most recent suppressed call once per
//! window. Both require a tokio runtime; neither exposes cancellation of an
//! already-fired callback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

/// Trailing-edge debouncer: only the last call of a burst executes.
///
/// Each call cancels the previously scheduled invocation and schedules a new
/// one `delay` later, so the callback runs once per quiet period, with the
/// arguments of the latest call.
pub struct Debouncer<T: Send + 'static> {
    delay: Duration,
    callback: Arc<dyn Fn(T) + Send + Sync>,
    pending: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration, callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self { delay, callback: Arc::new(callback), pending: Arc::new(Mutex::new(None)) }
    }

    /// Schedule `value` for delivery, superseding any pending delivery.
    pub fn call(&self, value: T) {
        let callback = Arc::clone(&self.callback);
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback(value);
        });

        let mut pending = lock_or_recover(&self.pending);
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    /// Drop a pending delivery, if any.
    pub fn cancel(&self) {
        if let Some(handle) = lock_or_recover(&self.pending).take() {
            handle.abort();
        }
    }
}

struct ThrottleWindow<T> {
    in_window: bool,
    suppressed: Option<T>,
}

/// Leading-edge throttler with one trailing replay per window.
///
/// The first call executes immediately and opens a window of `limit`. Calls
/// inside the window are suppressed, remembering only the latest arguments.
/// When the window elapses, a suppressed call (if any) executes once and the
/// window restarts; otherwise the throttler goes idle.
pub struct Throttler<T: Send + 'static> {
    limit: Duration,
    callback: Arc<dyn Fn(T) + Send + Sync>,
    window: Arc<Mutex<ThrottleWindow<T>>>,
}

impl<T: Send + 'static> Throttler<T> {
    pub fn new(limit: Duration, callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            limit,
            callback: Arc::new(callback),
            window: Arc::new(Mutex::new(ThrottleWindow { in_window: false, suppressed: None })),
        }
    }

    pub fn call(&self, value: T) {
        {
            let mut window = lock_or_recover(&self.window);
            if window.in_window {
                window.suppressed = Some(value);
                return;
            }
            window.in_window = true;
        }

        (self.callback)(value);
        self.spawn_window_timer();
    }

    fn spawn_window_timer(&self) {
        let window = Arc::clone(&self.window);
        let callback = Arc::clone(&self.callback);
        let limit = self.limit;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(limit).await;

                let replay = {
                    let mut window = lock_or_recover(&window);
                    match window.suppressed.take() {
                        Some(value) => Some(value),
                        None => {
                            window.in_window = false;
                            None
                        }
                    }
                };

                match replay {
                    // A trailing replay restarts the window.
                    Some(value) => callback(value),
                    None => break,
                }
            }
        });
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("throttle state lock poisoned");
            poisoned.into_inner()
        }
    }
}
