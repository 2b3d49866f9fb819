//! Error types for the control channel.

use crate::codes;
use crate::envelope::ServiceError;
use thiserror::Error;

/// Result type for channel operations.
pub type IpcResult<T> = Result<T, IpcError>;

/// Errors surfaced to the caller awaiting a specific call.
#[derive(Debug, Error)]
pub enum IpcError {
    /// No matching response arrived before the deadline.
    #[error("request '{action}' timed out after {timeout_ms}ms")]
    Timeout {
        action: &'static str,
        timeout_ms: u64,
    },

    /// The channel is closed; no new calls are accepted.
    #[error("channel closed")]
    ChannelClosed,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer answered with a typed failure.
    #[error("remote failure {0}")]
    Remote(ServiceError),

    /// The peer answered with a different action than the one requested.
    #[error("unexpected response: expected '{expected}', got '{got}'")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },
}

impl IpcError {
    /// Stable code for this error, suitable for a failure envelope.
    pub fn code(&self) -> &str {
        match self {
            Self::Timeout { .. } => codes::TIMEOUT,
            Self::ChannelClosed => codes::CHANNEL_CLOSED,
            Self::Remote(error) => &error.code,
            Self::Serialization(_) | Self::Io(_) | Self::UnexpectedResponse { .. } => {
                codes::INTERNAL_ERROR
            }
        }
    }

    /// The remote failure, when the peer answered with one.
    pub fn as_remote(&self) -> Option<&ServiceError> {
        match self {
            Self::Remote(error) => Some(error),
            _ => None,
        }
    }

    /// Converts into the wire failure shape, keeping remote codes intact.
    pub fn into_service_error(self) -> ServiceError {
        match self {
            Self::Remote(error) => error,
            other => ServiceError::new(other.code().to_string(), other.to_string()),
        }
    }
}
