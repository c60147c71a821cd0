//! Closed classification of transient backend errors.
//!
//! An error is retried only when it matches the allow-lists below; anything
//! unknown fails fast rather than masking a permanent error behind retries.

use crate::error::UpstreamError;

use super::retry::RetryPolicy;

/// HTTP-like status codes worth retrying.
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Backend error codes treated as transient: insufficient storage,
/// too many requests, connection pool exhausted.
pub const RETRYABLE_BACKEND_CODES: [&str; 3] = ["PGRST116", "PGRST122", "57014"];

/// Whether an upstream error is transient and therefore retryable.
///
/// In order: a network failure (no response at all) is retryable; a status
/// in [`RETRYABLE_STATUS_CODES`] is retryable; a backend code in
/// [`RETRYABLE_BACKEND_CODES`] is retryable; everything else (validation,
/// auth, not-found, empty results) is not.
pub fn is_transient(error: &UpstreamError) -> bool {
    if error.is_network() {
        return true;
    }
    if let Some(status) = error.http_status() {
        if RETRYABLE_STATUS_CODES.contains(&status) {
            return true;
        }
    }
    if let Some(code) = error.backend_code() {
        return RETRYABLE_BACKEND_CODES.contains(&code);
    }
    false
}

/// Retry policy that retries exactly the transient errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transient;

impl RetryPolicy<UpstreamError> for Transient {
    fn should_retry(&self, error: &UpstreamError, _attempt: u32) -> bool {
        is_transient(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failures_are_transient() {
        assert!(is_transient(&UpstreamError::network("connection reset")));
    }

    #[test]
    fn allow_listed_statuses_are_transient() {
        for status in RETRYABLE_STATUS_CODES {
            assert!(is_transient(&UpstreamError::status(status, "transient")), "status {status}");
        }
        assert!(!is_transient(&UpstreamError::status(400, "bad request")));
        assert!(!is_transient(&UpstreamError::status(401, "unauthorized")));
        assert!(!is_transient(&UpstreamError::status(404, "not found")));
    }

    #[test]
    fn allow_listed_backend_codes_are_transient() {
        for code in RETRYABLE_BACKEND_CODES {
            assert!(is_transient(&UpstreamError::backend(code, "transient")), "code {code}");
        }
        assert!(!is_transient(&UpstreamError::backend("PGRST301", "JWT expired")));
    }

    #[test]
    fn retryable_code_on_non_retryable_status_is_transient() {
        // Status check and code check are independent.
        let err = UpstreamError::status_with_code(409, "PGRST122", "too many requests");
        assert!(is_transient(&err));
    }

    #[test]
    fn empty_results_are_not_transient() {
        assert!(!is_transient(&UpstreamError::empty_result("query")));
    }
}
