//! Common utilities shared across Hup crates.
//!
//! The crate has two layers:
//!
//! - [`resilience`]: everything between application code and the backend:
//!   retrying transient failures with jittered exponential backoff, client
//!   side rate limiting, circuit breaking, call-rate shaping, and health
//!   probing.
//! - [`presence`]: geolocation watching and the movement-aware throttler
//!   that turns raw position samples into presence updates.
//!
//! [`error`] defines the upstream error model both layers classify against,
//! and [`time`] provides the [`time::Clock`] abstraction that keeps the
//! time-sensitive components deterministic under test.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod error;
pub mod presence;
pub mod resilience;
pub mod time;

pub use error::UpstreamError;
pub use time::{Clock, SystemClock};
