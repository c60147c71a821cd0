//! Exponential backoff with jitter for retry delays.

use std::time::Duration;

use rand::Rng;

use super::retry::RetryConfig;

/// Upper bound (exclusive) of the uniform jitter added to every delay.
pub const MAX_JITTER: Duration = Duration::from_millis(1000);

/// Exponential delay for a 1-based attempt number, before jitter.
///
/// `base_delay * backoff_multiplier^(attempt - 1)`, clamped to the
/// configured maximum.
pub fn raw_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let millis =
        config.base_delay.as_millis() as f64 * config.backoff_multiplier.powi(exponent as i32);
    let clamped = millis.min(config.max_delay.as_millis() as f64) as u64;
    Duration::from_millis(clamped)
}

/// Delay to wait before the attempt after `attempt` fails.
///
/// Adds a uniform jitter in `[0, MAX_JITTER)` on top of [`raw_delay`] so
/// concurrent retriers do not wake in lockstep.
pub fn delay_for(config: &RetryConfig, attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..MAX_JITTER.as_millis() as u64);
    raw_delay(config, attempt) + Duration::from_millis(jitter)
}
