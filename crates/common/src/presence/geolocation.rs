//! Contract of the device geolocation source.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// One raw position fix from the geolocation source.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Estimated accuracy radius in meters.
    pub accuracy: f64,
    /// Degrees clockwise from true north, when the device reports one.
    pub heading: Option<f64>,
    /// Ground speed in meters per second, when the device reports one.
    pub speed: Option<f64>,
    pub altitude: Option<f64>,
    /// Milliseconds since the Unix epoch, as stamped by the source.
    pub timestamp: u64,
}

/// Failures surfaced by the geolocation source.
///
/// These are delivered as watch events, not panics, so the caller can render
/// an appropriate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),
    #[error("timed out waiting for a position fix")]
    Timeout,
    #[error("geolocation is not supported on this device")]
    Unsupported,
}

/// Outcome of the platform permission query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
}

/// Options passed to the source for one-shot fixes and watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    pub enable_high_accuracy: bool,
    /// How long the source may take to produce a fix.
    pub timeout: Duration,
    /// Maximum acceptable age of a cached fix; zero means always fresh.
    pub maximum_age: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::ZERO,
        }
    }
}

/// Event delivered on a watch channel.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Position(LocationSample),
    Error(GeoError),
    Permission(PermissionState),
}

/// Device geolocation source.
///
/// Implementations wrap whatever the platform provides. The watch channel
/// ends when the source stops or the receiver is dropped; dropping the
/// receiver is the equivalent of clearing the watch.
#[async_trait]
pub trait GeolocationSource: Send + Sync {
    /// One-shot position fix.
    async fn current_position(&self, options: &WatchOptions) -> Result<LocationSample, GeoError>;

    /// Start a continuous watch, delivering positions, errors, and
    /// permission changes as they occur.
    async fn watch_position(
        &self,
        options: &WatchOptions,
    ) -> Result<mpsc::Receiver<WatchEvent>, GeoError>;

    /// Current permission state. Subsequent changes arrive as
    /// [`WatchEvent::Permission`] events on active watches.
    async fn permission_state(&self) -> PermissionState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_watch_options_request_fresh_high_accuracy_fixes() {
        let options = WatchOptions::default();
        assert!(options.enable_high_accuracy);
        assert_eq!(options.timeout, Duration::from_secs(10));
        assert_eq!(options.maximum_age, Duration::ZERO);
    }

    #[test]
    fn geo_errors_render_for_display() {
        assert_eq!(GeoError::PermissionDenied.to_string(), "location permission denied");
        assert_eq!(
            GeoError::PositionUnavailable("no GPS".into()).to_string(),
            "position unavailable: no GPS"
        );
    }
}
