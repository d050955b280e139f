//! Relay error taxonomy
//!
//! Every rejection produced by the media pipeline or the iframe sanitizer is
//! one of these variants. Each variant maps to exactly one HTTP status and a
//! stable machine-readable code. Client-facing messages for policy
//! violations are deliberately generic: the detailed reason goes to the log,
//! never to the caller.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors surfaced by the relay entry points
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Malformed or missing URL, or a non-secure scheme (400)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Host, scheme or address not permitted (403)
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Upstream content-type is not an allowed media class (415)
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Upstream body exceeds the configured maximum (413)
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    /// Outbound fetch did not complete within the configured timeout (504)
    #[error("upstream timed out after {0} ms")]
    UpstreamTimeout(u64),

    /// Transport failure, non-success status or broken redirect chain (502)
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Sanitization produced an unusable result (500)
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RelayError::PolicyViolation(_) => StatusCode::FORBIDDEN,
            RelayError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code for JSON bodies
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidInput(_) => "INVALID_INPUT",
            RelayError::PolicyViolation(_) => "NOT_PERMITTED",
            RelayError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            RelayError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            RelayError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            RelayError::Upstream(_) => "UPSTREAM_ERROR",
            RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to return to the caller.
    ///
    /// Policy violations collapse to one message so callers cannot probe
    /// which internal addresses a hostname resolves to.
    pub fn public_message(&self) -> String {
        match self {
            RelayError::PolicyViolation(_) => "target not permitted".to_string(),
            RelayError::Upstream(_) => "upstream request failed".to_string(),
            RelayError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the failure is attributable to the upstream rather than the caller
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            RelayError::UpstreamTimeout(_) | RelayError::Upstream(_)
        )
    }
}
