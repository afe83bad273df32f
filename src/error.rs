//! Error types for mirror-link.

use thiserror::Error;

/// Errors that can occur in live-query client operations.
///
/// The first four variants form the fault taxonomy that is also surfaced on
/// the shared fault stream (see [`crate::events::FaultEvent`]); the rest are
/// ambient failures (configuration, serialization, timeouts) that stay on
/// the caller's `Result` path.
#[derive(Error, Debug)]
pub enum MirrorLinkError {
    /// Connection-level failure (abnormal close, connect failure, dead peer).
    #[error("transport error: {0}")]
    TransportError(String),

    /// A request was rejected by the server with a non-5xx status, or the
    /// response carried a structured error payload.
    #[error("request error ({status_code}): {message}")]
    RequestError { status_code: u16, message: String },

    /// The server answered with a 5xx status.
    #[error("server error ({status_code}): {message}")]
    ServerError { status_code: u16, message: String },

    /// Malformed or unexpected wire data (unknown notification kind,
    /// unparsable frame, observe response missing its item list).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Invalid client configuration (bad URL, unsupported scheme).
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// JSON encode/decode failure outside the notification path.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// An operation exceeded its configured deadline.
    #[error("timeout: {0}")]
    TimeoutError(String),

    /// Underlying HTTP client failure.
    #[error(transparent)]
    HttpError(#[from] reqwest::Error),
}

/// Result type for live-query client operations.
pub type Result<T> = std::result::Result<T, MirrorLinkError>;

impl MirrorLinkError {
    /// `RequestError` and its 5xx subtype both count as request failures.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::RequestError { .. } | Self::ServerError { .. }
        )
    }

    /// Produce an owned copy of this error for fan-out to multiple waiters.
    ///
    /// `reqwest::Error` is not `Clone`, so HTTP failures degrade to a
    /// `TransportError` carrying the display string.
    pub(crate) fn duplicate(&self) -> MirrorLinkError {
        match self {
            Self::TransportError(m) => Self::TransportError(m.clone()),
            Self::RequestError { status_code, message } => Self::RequestError {
                status_code: *status_code,
                message: message.clone(),
            },
            Self::ServerError { status_code, message } => Self::ServerError {
                status_code: *status_code,
                message: message.clone(),
            },
            Self::ProtocolError(m) => Self::ProtocolError(m.clone()),
            Self::ConfigurationError(m) => Self::ConfigurationError(m.clone()),
            Self::SerializationError(m) => Self::SerializationError(m.clone()),
            Self::TimeoutError(m) => Self::TimeoutError(m.clone()),
            Self::HttpError(e) => Self::TransportError(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_is_request_error() {
        let err = MirrorLinkError::ServerError {
            status_code: 503,
            message: "unavailable".to_string(),
        };
        assert!(err.is_request_error());
    }

    #[test]
    fn test_transport_error_is_not_request_error() {
        assert!(!MirrorLinkError::TransportError("closed".to_string()).is_request_error());
    }

    #[test]
    fn test_duplicate_preserves_variant_and_message() {
        let err = MirrorLinkError::RequestError {
            status_code: 413,
            message: "payload too large".to_string(),
        };
        match err.duplicate() {
            MirrorLinkError::RequestError { status_code, message } => {
                assert_eq!(status_code, 413);
                assert_eq!(message, "payload too large");
            },
            other => panic!("unexpected duplicate: {:?}", other),
        }
    }
}
