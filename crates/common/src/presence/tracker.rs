//! Presence/location throttler.
//!
//! [`LocationTracker`] watches the geolocation source and decides, per raw
//! sample, whether enough time has elapsed to push a presence update. The
//! interval adapts to movement: a device moving faster than the configured
//! speed threshold updates frequently, a stationary one rarely, trading
//! location freshness for network and battery cost. Samples below the
//! interval are discarded; admitted samples are forwarded to the
//! [`PresenceUpdater`] collaborator.
//!
//! Geolocation errors and permission changes surface as status/snapshot
//! transitions so the caller can render them; nothing here panics on a
//! misbehaving source.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::time::{Clock, SystemClock};

use super::geolocation::{
    GeoError, GeolocationSource, LocationSample, PermissionState, WatchEvent, WatchOptions,
};

/// Timeout for the fast initial fix taken before the watch starts.
const INITIAL_FIX_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout passed to the continuous watch.
const WATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure reported by the presence-update collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("presence update failed: {0}")]
pub struct PresenceUpdateError(pub String);

/// Collaborator that pushes an admitted location to the backend.
#[async_trait]
pub trait PresenceUpdater: Send + Sync {
    async fn update_location(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), PresenceUpdateError>;
}

/// Throttling and watch behavior of a [`LocationTracker`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Minimum time between presence pushes while moving.
    pub update_interval_moving: Duration,
    /// Minimum time between presence pushes while stationary.
    pub update_interval_static: Duration,
    /// Ground speed above which the device counts as moving, in m/s.
    pub moving_speed_threshold: f64,
    /// When false, admitted samples update the local snapshot only.
    pub auto_update_presence: bool,
    pub enable_high_accuracy: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            update_interval_moving: Duration::from_secs(5),
            update_interval_static: Duration::from_secs(30),
            moving_speed_threshold: 0.5,
            auto_update_presence: true,
            enable_high_accuracy: true,
        }
    }
}

impl TrackerConfig {
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder::new()
    }
}

#[derive(Debug, Default)]
pub struct TrackerConfigBuilder {
    config: TrackerConfig,
}

impl TrackerConfigBuilder {
    pub fn new() -> Self {
        Self { config: TrackerConfig::default() }
    }

    pub fn update_interval_moving(mut self, interval: Duration) -> Self {
        self.config.update_interval_moving = interval;
        self
    }

    pub fn update_interval_static(mut self, interval: Duration) -> Self {
        self.config.update_interval_static = interval;
        self
    }

    pub fn moving_speed_threshold(mut self, threshold: f64) -> Self {
        self.config.moving_speed_threshold = threshold;
        self
    }

    pub fn auto_update_presence(mut self, auto: bool) -> Self {
        self.config.auto_update_presence = auto;
        self
    }

    pub fn enable_high_accuracy(mut self, enable: bool) -> Self {
        self.config.enable_high_accuracy = enable;
        self
    }

    pub fn build(self) -> TrackerConfig {
        self.config
    }
}

/// Watch lifecycle: `Idle -> Watching -> (Failed | Watching)`, ended by
/// [`LocationTracker::stop_watching`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerStatus {
    Idle,
    Watching,
    Failed(GeoError),
}

/// Local display state: the latest admitted sample plus source conditions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocationSnapshot {
    pub latest: Option<LocationSample>,
    pub permission: Option<PermissionState>,
    pub last_error: Option<GeoError>,
    pub is_moving: bool,
}

struct TrackerState {
    status: TrackerStatus,
    /// Wall-clock milliseconds of the last admitted sample; `None` until the
    /// first sample, which is always admitted.
    last_push_ms: Option<u64>,
    snapshot: LocationSnapshot,
}

struct TrackerShared<C: Clock> {
    config: TrackerConfig,
    updater: Arc<dyn PresenceUpdater>,
    clock: C,
    state: Mutex<TrackerState>,
}

impl<C: Clock> TrackerShared<C> {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("tracker state lock poisoned");
                poisoned.into_inner()
            }
        }
    }

    /// Admit-or-discard decision for one raw sample.
    ///
    /// Returns `true` when the sample was admitted (and, with
    /// `auto_update_presence`, forwarded to the updater). Movement state is
    /// tracked even for discarded samples.
    async fn observe(&self, sample: LocationSample) -> bool {
        let now = self.clock.millis_since_epoch();
        let speed = sample.speed.unwrap_or(0.0);
        let is_moving = speed > self.config.moving_speed_threshold;
        let interval = if is_moving {
            self.config.update_interval_moving
        } else {
            self.config.update_interval_static
        };

        let admitted = {
            let mut state = self.lock_state();
            state.status = TrackerStatus::Watching;
            state.snapshot.is_moving = is_moving;

            let throttled = state
                .last_push_ms
                .is_some_and(|last| now.saturating_sub(last) < interval.as_millis() as u64);
            if throttled {
                false
            } else {
                state.last_push_ms = Some(now);
                state.snapshot.latest = Some(sample.clone());
                state.snapshot.last_error = None;
                state.snapshot.permission = Some(PermissionState::Granted);
                true
            }
        };

        if admitted && self.config.auto_update_presence {
            if let Err(err) =
                self.updater.update_location(sample.latitude, sample.longitude).await
            {
                // Presence pushes are best-effort; the next admitted sample
                // will try again.
                error!(error = %err, "failed to push presence update");
            }
        }
        admitted
    }

    fn record_error(&self, err: GeoError) {
        warn!(error = %err, "geolocation source error");
        let mut state = self.lock_state();
        state.snapshot.last_error = Some(err.clone());
        state.status = TrackerStatus::Failed(err);
    }

    fn record_permission(&self, permission: PermissionState) {
        let mut state = self.lock_state();
        state.snapshot.permission = Some(permission);
    }
}

/// Stateful loop over the geolocation watch lifecycle.
pub struct LocationTracker<C: Clock = SystemClock> {
    shared: Arc<TrackerShared<C>>,
    source: Arc<dyn GeolocationSource>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl LocationTracker<SystemClock> {
    pub fn new(
        source: Arc<dyn GeolocationSource>,
        updater: Arc<dyn PresenceUpdater>,
        config: TrackerConfig,
    ) -> Self {
        Self::with_clock(source, updater, config, SystemClock)
    }
}

impl<C: Clock> LocationTracker<C> {
    pub fn with_clock(
        source: Arc<dyn GeolocationSource>,
        updater: Arc<dyn PresenceUpdater>,
        config: TrackerConfig,
        clock: C,
    ) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                config,
                updater,
                clock,
                state: Mutex::new(TrackerState {
                    status: TrackerStatus::Idle,
                    last_push_ms: None,
                    snapshot: LocationSnapshot::default(),
                }),
            }),
            source,
            watch_task: Mutex::new(None),
        }
    }

    pub fn status(&self) -> TrackerStatus {
        self.shared.lock_state().status.clone()
    }

    pub fn snapshot(&self) -> LocationSnapshot {
        self.shared.lock_state().snapshot.clone()
    }

    /// Feed one raw sample through the throttling decision.
    ///
    /// The watch loop calls this internally; it is public so hosts with
    /// their own position delivery can reuse the same throttling.
    pub async fn observe(&self, sample: LocationSample) -> bool {
        self.shared.observe(sample).await
    }

    /// Begin watching the geolocation source.
    ///
    /// Takes one fast always-fresh fix, then consumes the watch stream until
    /// it ends or [`stop_watching`](Self::stop_watching) is called. A source
    /// that cannot start a watch leaves the tracker in
    /// [`TrackerStatus::Failed`] rather than failing the call.
    pub async fn start_watching(&self) {
        self.abort_watch_task();

        let permission = self.source.permission_state().await;
        self.shared.record_permission(permission);

        let initial_options = WatchOptions {
            enable_high_accuracy: self.shared.config.enable_high_accuracy,
            timeout: INITIAL_FIX_TIMEOUT,
            maximum_age: Duration::ZERO,
        };
        match self.source.current_position(&initial_options).await {
            Ok(sample) => {
                self.shared.observe(sample).await;
            }
            // Not fatal; the watch below may still deliver positions.
            Err(err) => self.shared.record_error(err),
        }

        let watch_options = WatchOptions {
            enable_high_accuracy: self.shared.config.enable_high_accuracy,
            timeout: WATCH_TIMEOUT,
            maximum_age: Duration::ZERO,
        };
        let mut events = match self.source.watch_position(&watch_options).await {
            Ok(events) => events,
            Err(err) => {
                self.shared.record_error(err);
                return;
            }
        };

        self.shared.lock_state().status = TrackerStatus::Watching;

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    WatchEvent::Position(sample) => {
                        shared.observe(sample).await;
                    }
                    WatchEvent::Error(err) => shared.record_error(err),
                    WatchEvent::Permission(permission) => shared.record_permission(permission),
                }
            }
            debug!("geolocation watch stream ended");
        });

        let mut slot = match self.watch_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("tracker watch task lock poisoned");
                poisoned.into_inner()
            }
        };
        *slot = Some(handle);
    }

    /// Stop consuming the watch and return to [`TrackerStatus::Idle`].
    ///
    /// The last snapshot is kept for display.
    pub fn stop_watching(&self) {
        self.abort_watch_task();
        self.shared.lock_state().status = TrackerStatus::Idle;
    }

    fn abort_watch_task(&self) {
        let handle = match self.watch_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => {
                warn!("tracker watch task lock poisoned");
                poisoned.into_inner().take()
            }
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl<C: Clock> Drop for LocationTracker<C> {
    fn drop(&mut self) {
        self.abort_watch_task();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::time::MockClock;

    use super::*;

    struct RecordingUpdater {
        pushes: Mutex<Vec<(f64, f64)>>,
        failures_remaining: AtomicU32,
    }

    impl RecordingUpdater {
        fn new() -> Arc<Self> {
            Arc::new(Self { pushes: Mutex::new(Vec::new()), failures_remaining: AtomicU32::new(0) })
        }

        fn push_count(&self) -> usize {
            self.pushes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PresenceUpdater for RecordingUpdater {
        async fn update_location(
            &self,
            latitude: f64,
            longitude: f64,
        ) -> Result<(), PresenceUpdateError> {
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(PresenceUpdateError("backend offline".into()));
            }
            self.pushes.lock().unwrap().push((latitude, longitude));
            Ok(())
        }
    }

    struct NoopSource;

    #[async_trait]
    impl GeolocationSource for NoopSource {
        async fn current_position(
            &self,
            _options: &WatchOptions,
        ) -> Result<LocationSample, GeoError> {
            Err(GeoError::PositionUnavailable("noop".into()))
        }

        async fn watch_position(
            &self,
            _options: &WatchOptions,
        ) -> Result<tokio::sync::mpsc::Receiver<WatchEvent>, GeoError> {
            Err(GeoError::Unsupported)
        }

        async fn permission_state(&self) -> PermissionState {
            PermissionState::Prompt
        }
    }

    fn sample(speed: Option<f64>, timestamp: u64) -> LocationSample {
        LocationSample {
            latitude: 52.52,
            longitude: 13.405,
            accuracy: 10.0,
            heading: None,
            speed,
            altitude: None,
            timestamp,
        }
    }

    fn tracker(
        config: TrackerConfig,
        updater: Arc<RecordingUpdater>,
    ) -> (LocationTracker<MockClock>, MockClock) {
        let clock = MockClock::new();
        let tracker =
            LocationTracker::with_clock(Arc::new(NoopSource), updater, config, clock.clone());
        (tracker, clock)
    }

    #[tokio::test]
    async fn first_sample_is_always_admitted() {
        let updater = RecordingUpdater::new();
        let (tracker, _clock) = tracker(TrackerConfig::default(), Arc::clone(&updater));

        assert!(tracker.observe(sample(None, 0)).await);
        assert_eq!(updater.push_count(), 1);
        assert_eq!(tracker.status(), TrackerStatus::Watching);
    }

    #[tokio::test]
    async fn stationary_samples_are_throttled_to_the_static_interval() {
        let updater = RecordingUpdater::new();
        let (tracker, clock) = tracker(TrackerConfig::default(), Arc::clone(&updater));

        // Samples every 10s; only one push per elapsed 30s interval.
        for step in 0..7 {
            clock.set_elapsed(Duration::from_secs(step * 10));
            tracker.observe(sample(None, step * 10_000)).await;
        }

        // Admitted at t=0, t=30, t=60.
        assert_eq!(updater.push_count(), 3);
    }

    #[tokio::test]
    async fn moving_samples_use_the_moving_interval() {
        let updater = RecordingUpdater::new();
        let (tracker, clock) = tracker(TrackerConfig::default(), Arc::clone(&updater));

        // Speed above 0.5 m/s, samples every 6s: each exceeds the 5s moving
        // interval, so every sample is forwarded.
        for step in 0..5 {
            clock.set_elapsed(Duration::from_secs(step * 6));
            assert!(tracker.observe(sample(Some(1.2), step * 6_000)).await);
        }

        assert_eq!(updater.push_count(), 5);
        assert!(tracker.snapshot().is_moving);
    }

    #[tokio::test]
    async fn speed_at_threshold_counts_as_stationary() {
        let updater = RecordingUpdater::new();
        let (tracker, clock) = tracker(TrackerConfig::default(), Arc::clone(&updater));

        tracker.observe(sample(Some(0.5), 0)).await;
        assert!(!tracker.snapshot().is_moving);

        clock.set_elapsed(Duration::from_secs(10));
        // 10s < 30s static interval: discarded despite exceeding the moving
        // interval.
        assert!(!tracker.observe(sample(Some(0.5), 10_000)).await);
    }

    #[tokio::test]
    async fn discarded_samples_do_not_touch_the_snapshot_position() {
        let updater = RecordingUpdater::new();
        let (tracker, clock) = tracker(TrackerConfig::default(), Arc::clone(&updater));

        tracker.observe(sample(None, 0)).await;
        clock.set_elapsed(Duration::from_secs(10));

        let mut moved = sample(None, 10_000);
        moved.latitude = 48.85;
        assert!(!tracker.observe(moved).await);
        assert_eq!(tracker.snapshot().latest.unwrap().latitude, 52.52);
    }

    #[tokio::test]
    async fn auto_update_disabled_keeps_pushes_local() {
        let updater = RecordingUpdater::new();
        let config = TrackerConfig::builder().auto_update_presence(false).build();
        let (tracker, _clock) = tracker(config, Arc::clone(&updater));

        assert!(tracker.observe(sample(None, 0)).await);
        assert_eq!(updater.push_count(), 0);
        assert!(tracker.snapshot().latest.is_some());
    }

    #[tokio::test]
    async fn updater_failure_does_not_fail_the_tracker() {
        let updater = RecordingUpdater::new();
        updater.failures_remaining.store(1, Ordering::SeqCst);
        let (tracker, clock) = tracker(TrackerConfig::default(), Arc::clone(&updater));

        assert!(tracker.observe(sample(None, 0)).await);
        assert_eq!(updater.push_count(), 0);

        clock.set_elapsed(Duration::from_secs(30));
        assert!(tracker.observe(sample(None, 30_000)).await);
        assert_eq!(updater.push_count(), 1);
    }

    #[tokio::test]
    async fn unsupported_source_fails_the_tracker_without_panicking() {
        let updater = RecordingUpdater::new();
        let (tracker, _clock) = tracker(TrackerConfig::default(), updater);

        tracker.start_watching().await;
        assert_eq!(tracker.status(), TrackerStatus::Failed(GeoError::Unsupported));
        assert_eq!(tracker.snapshot().permission, Some(PermissionState::Prompt));

        tracker.stop_watching();
        assert_eq!(tracker.status(), TrackerStatus::Idle);
    }
}
