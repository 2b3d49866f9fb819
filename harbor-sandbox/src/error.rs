//! Error types for the sandbox.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use harbor_bundle::BundleError;
use harbor_ipc::{IpcError, ServiceError, codes};
use serde_json::json;
use thiserror::Error;

/// Failures of sandbox-side operations, reported to the host as
/// [`ServiceError`]s.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox has not been initialized")]
    NotInitialized,

    #[error("host call failed: {0}")]
    Host(#[from] IpcError),

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("unsupported content type '{0}'")]
    UnsupportedMime(String),

    #[error("storage access failed: {0}")]
    Storage(String),

    #[error("bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub fn code(&self) -> &str {
        match self {
            Self::NotInitialized => codes::NOT_INITIALIZED,
            Self::Host(e) => e.code(),
            Self::Worker(_) => codes::WORKER_EXECUTION_FAILED,
            Self::UnsupportedMime(_) => codes::UNRECOGNIZED_MIME_TYPE,
            Self::Storage(_) => codes::STORAGE_ACCESS_FAILURE,
            Self::Bundle(_) | Self::Serialization(_) | Self::Io(_) => codes::INTERNAL_ERROR,
        }
    }
}

impl From<SandboxError> for ServiceError {
    fn from(error: SandboxError) -> Self {
        match error {
            // Keep the host's own code and message.
            SandboxError::Host(e) => e.into_service_error(),
            other => ServiceError::new(other.code().to_string(), other.to_string()),
        }
    }
}

/// Failures of gateway requests, each mapped to an HTTP status.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing or malformed Host header")]
    MissingHost,

    #[error("no application serves host '{0}'")]
    UnknownHost(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("sandbox has not been initialized")]
    NotInitialized,

    #[error("application '{0}' has no active install")]
    NotInstalled(String),

    /// Worker config lookup failed; carries the host's message.
    #[error("{0}")]
    ConfigLookup(ServiceError),

    #[error("worker failed: {0}")]
    WorkerFailed(String),

    #[error("application '{0}' not found")]
    AppNotFound(String),

    #[error("bundle lookup failed: {0}")]
    BundleLookup(ServiceError),

    #[error("bundle unavailable: {0}")]
    BundleFetch(String),

    #[error("not found")]
    FileNotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingHost | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownHost(_) | Self::AppNotFound(_) | Self::FileNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotInitialized | Self::NotInstalled(_) => StatusCode::CONFLICT,
            Self::WorkerFailed(_) => StatusCode::BAD_GATEWAY,
            Self::ConfigLookup(_)
            | Self::BundleLookup(_)
            | Self::BundleFetch(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Service code reported in the error body, when one applies.
    fn code(&self) -> Option<&str> {
        match self {
            Self::ConfigLookup(e) | Self::BundleLookup(e) => Some(&e.code),
            Self::NotInitialized | Self::NotInstalled(_) => Some(codes::NOT_INITIALIZED),
            Self::AppNotFound(_) | Self::UnknownHost(_) => Some(codes::APP_NOT_FOUND),
            Self::WorkerFailed(_) => Some(codes::WORKER_EXECUTION_FAILED),
            Self::BundleFetch(_) => Some(codes::STORAGE_ACCESS_FAILURE),
            Self::Internal(_) => Some(codes::INTERNAL_ERROR),
            Self::MissingHost | Self::BadRequest(_) | Self::BodyTooLarge { .. } | Self::FileNotFound => {
                None
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::ConfigLookup(e) => e.message.clone(),
            other => other.to_string(),
        };
        let body = json!({ "error": { "code": self.code(), "message": message } });
        (status, Json(body)).into_response()
    }
}
