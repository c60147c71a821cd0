//! Presence and location tracking.
//!
//! [`geolocation`] defines the contract of the device's location source:
//! position samples, watch options, permission states, and the
//! [`geolocation::GeolocationSource`] trait delivering watch events over a
//! channel. [`tracker`] builds the presence throttler on top: it classifies
//! movement from each sample and decides, based on elapsed time and movement
//! state, whether to forward the sample to the presence-update collaborator.
//!
//! The tracker is deliberately independent of the resilience layer; the
//! presence updater implementation chooses its own retry/limiting policy.

pub mod geolocation;
pub mod tracker;

pub use geolocation::{
    GeoError, GeolocationSource, LocationSample, PermissionState, WatchEvent, WatchOptions,
};
pub use tracker::{
    LocationSnapshot, LocationTracker, PresenceUpdateError, PresenceUpdater, TrackerConfig,
    TrackerConfigBuilder, TrackerStatus,
};
