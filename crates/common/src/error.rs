//! Upstream error taxonomy for backend calls.
//!
//! Every failure a backend call can surface is captured by [`UpstreamError`]:
//! an optional HTTP-like status, an optional backend-specific code, a network
//! marker, and the synthetic empty-result case the adapters raise when a
//! nominally successful call carries no data. The retry classifier reads the
//! shape of these errors and never mutates them.

use thiserror::Error;

/// Error reported by (or synthesized around) a backend call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    /// The request never produced a response (DNS failure, connection reset,
    /// unreachable host). Carries neither a status nor a backend code.
    #[error("network error: {message}")]
    Network { message: String },

    /// The backend answered with an HTTP-like status code, optionally paired
    /// with a backend error code.
    #[error("upstream status {status}: {message}")]
    Status { status: u16, message: String, code: Option<String> },

    /// The backend reported a domain error code without a status.
    #[error("upstream error {code}: {message}")]
    Backend { code: String, message: String },

    /// A nominally successful call returned no data. Synthesized by the
    /// query/mutation adapters so callers cannot silently proceed without a
    /// value.
    #[error("{operation} returned no data")]
    EmptyResult { operation: &'static str },
}

impl UpstreamError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into(), code: None }
    }

    pub fn status_with_code(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into(), code: Some(code.into()) }
    }

    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend { code: code.into(), message: message.into() }
    }

    pub fn empty_result(operation: &'static str) -> Self {
        Self::EmptyResult { operation }
    }

    /// HTTP-like status code, when the backend produced a response.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Backend-specific error code, when one was reported.
    pub fn backend_code(&self) -> Option<&str> {
        match self {
            Self::Status { code, .. } => code.as_deref(),
            Self::Backend { code, .. } => Some(code),
            _ => None,
        }
    }

    /// True when the request never reached the backend.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Authentication failure: 401, or an expired-token backend code.
    pub fn is_auth(&self) -> bool {
        self.http_status() == Some(401) || self.backend_code() == Some("PGRST301")
    }

    /// Authorization failure: 403, or an insufficient-privilege backend code.
    pub fn is_permission(&self) -> bool {
        self.http_status() == Some(403) || self.backend_code() == Some("42501")
    }

    /// Request-shape failure: 400, or a schema-mismatch backend code.
    pub fn is_validation(&self) -> bool {
        self.http_status() == Some(400)
            || self.backend_code().is_some_and(|code| code.starts_with("PGRST204"))
    }
}
