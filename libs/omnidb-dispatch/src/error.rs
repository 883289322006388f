use std::time::Duration;
use thiserror::Error;

/// Boxed error used for transport-level sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of a [`TransportError`].
///
/// Drives which notice, if any, the dispatcher surfaces to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request never reached a ready state (connection refused, reset, timeout).
    Offline,
    /// The server answered, but not with a usable envelope.
    Request,
    /// The call was cancelled by the user.
    Aborted,
}

/// Failure of a single call before an envelope could be obtained.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// No response was received (connect failure, DNS failure, reset)
    #[error("server unreachable: {0}")]
    Unreachable(#[source] BoxError),

    /// The configured request timeout elapsed before a response arrived
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP non-2xx status
    #[error("HTTP {status}: {body_preview}")]
    Status {
        status: http::StatusCode,
        body_preview: String,
    },

    /// 2xx response whose body is not a response envelope
    #[error("response is not a valid envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    /// Response body exceeded the configured size limit
    #[error("response body too large: limit {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Cancelled through the dispatcher or the call's own handle
    #[error("request aborted")]
    Aborted,
}

impl TransportError {
    /// Classify the failure for notice selection.
    #[must_use]
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) => TransportErrorKind::Offline,
            Self::Status { .. } | Self::InvalidEnvelope(_) | Self::BodyTooLarge { .. } => {
                TransportErrorKind::Request
            }
            Self::Aborted => TransportErrorKind::Aborted,
        }
    }

    /// Short status text in the vocabulary web clients use (`abort`, `timeout`,
    /// `parsererror`, `error`).
    #[must_use]
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::Aborted => "abort",
            Self::Timeout(_) => "timeout",
            Self::InvalidEnvelope(_) => "parsererror",
            Self::Unreachable(_) | Self::Status { .. } | Self::BodyTooLarge { .. } => "error",
        }
    }

    /// HTTP status of the response, when one was received.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Errors raised while preparing a call or building a dispatcher.
///
/// These are returned synchronously, before any side effect of the call
/// (loading indicator, cancel button, request) has happened.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DispatchError {
    /// Target URL could not be parsed
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Plain HTTP target while only TLS transport is allowed
    #[error("URL scheme '{scheme}' not allowed: HTTPS is required")]
    InsecureScheme { scheme: String },

    /// Request payload could not be serialized to JSON
    #[error("failed to serialize request payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Invalid header name (e.g. a misconfigured CSRF header)
    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Request building failed
    #[error("failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// TLS connector setup failed
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `exec` was called outside of a tokio runtime
    #[error("no tokio runtime available to drive the call")]
    NoRuntime,
}
