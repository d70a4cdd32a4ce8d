//! Error types and their classification

use std::sync::Arc;
use thiserror::Error;

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Broad category an [`Error`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Background resume data was present but unusable
    MalformedResumeData,
    /// The task had already left the `Created` state
    AlreadyStarted,
    /// Anything the transport reported while the request was in flight
    TransportFailure,
    /// The task was cancelled before it completed
    Cancelled,
    /// The request could not be built
    Usage,
}

/// Error types for request tasks and transports
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Resume data could not be used to continue a background transfer
    #[error("Malformed resume data: {0}")]
    MalformedResumeData(String),

    /// `start` was called on a task that is no longer in the `Created` state
    #[error("Task has already been started")]
    AlreadyStarted,

    /// Request was cancelled
    #[error("Request was cancelled")]
    Cancelled,

    /// Invalid URL
    #[error("Invalid URL")]
    InvalidUrl,

    /// Invalid header name or value
    #[error("Invalid header")]
    InvalidHeader,

    /// Network error reported by the transport
    #[error("Network error: {message} (code: {code})")]
    Network {
        /// Transport specific error code, `-1` when there is none
        code: i64,
        /// Error message
        message: String,
    },

    /// TLS/Certificate error
    #[error("TLS error: {message}")]
    Tls {
        /// Error message
        message: String,
    },

    /// Timeout error
    #[error("Request timed out")]
    Timeout,

    /// Server answered with a status the transport is configured to reject
    #[error("HTTP error: {0}")]
    Status(http::StatusCode),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedResumeData(_) => ErrorKind::MalformedResumeData,
            Error::AlreadyStarted => ErrorKind::AlreadyStarted,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::InvalidUrl | Error::InvalidHeader | Error::Json(_) => ErrorKind::Usage,
            Error::Network { .. }
            | Error::Tls { .. }
            | Error::Timeout
            | Error::Status(_)
            | Error::Io(_)
            | Error::Internal(_) => ErrorKind::TransportFailure,
        }
    }

    /// Whether this error means the task was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json(error.to_string())
    }
}

#[cfg(feature = "backend-reqwest")]
impl Error {
    /// Convert a reqwest error into our Error type
    pub(crate) fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Error::Timeout;
        }
        if let Some(status) = error.status() {
            return Error::Status(status);
        }

        let message = error.to_string();
        if is_tls_failure(&error) {
            Error::Tls { message }
        } else {
            Error::Network { code: -1, message }
        }
    }
}

/// Whether a rustls error appears anywhere in the source chain of `error`
#[cfg(feature = "backend-reqwest")]
fn is_tls_failure(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(error) = current {
        if error.is::<rustls::Error>() {
            return true;
        }
        // `io::Error::source` skips the wrapped error, so look inside by hand.
        if let Some(io) = error.downcast_ref::<std::io::Error>() {
            if io.get_ref().is_some_and(|inner| inner.is::<rustls::Error>()) {
                return true;
            }
        }
        current = error.source();
    }
    false
}
