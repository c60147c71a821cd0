//! Connection health probing.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::UpstreamError;

/// Result of one health probe against the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHealth {
    pub healthy: bool,
    /// Round-trip latency of the probe; absent when the probe failed.
    pub latency: Option<Duration>,
}

/// Measure backend health with a caller-supplied lightweight read.
///
/// The probe's value is discarded; only success and round-trip time matter.
/// Never fails: an erroring probe reports `healthy: false`.
pub async fn check_connection_health<T, F, Fut>(probe: F) -> ConnectionHealth
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let start = Instant::now();
    match probe().await {
        Ok(_) => ConnectionHealth { healthy: true, latency: Some(start.elapsed()) },
        Err(err) => {
            warn!(error = %err, "health probe failed");
            ConnectionHealth { healthy: false, latency: None }
        }
    }
}
