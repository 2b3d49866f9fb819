//! Wire envelope and the success/failure outcome carried in responses.

use harbor_types::RequestId;
use serde::de::DeserializeOwned;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::error::IpcError;

/// One frame on the control channel.
///
/// Requests carry `Q`, responses carry `P`. Either side may originate
/// requests; the id always comes from the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope<Q, P> {
    Request { id: RequestId, payload: Q },
    Response { id: RequestId, payload: P },
}

impl<Q, P> Envelope<Q, P> {
    pub fn id(&self) -> &RequestId {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => id,
        }
    }
}

/// Typed failure carried on the wire as `{code, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct ServiceError {
    pub code: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// `{ success: true, result }` or `{ success: false, error: { code, message } }`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(ServiceError),
}

impl<T> Outcome<T> {
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure(ServiceError::new(code, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> Result<T, IpcError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(error) => Err(IpcError::Remote(error)),
        }
    }
}

impl<T, E: Into<ServiceError>> From<Result<T, E>> for Outcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error.into()),
        }
    }
}

impl From<IpcError> for ServiceError {
    fn from(error: IpcError) -> Self {
        error.into_service_error()
    }
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Outcome", 2)?;
        match self {
            Self::Success(result) => {
                state.serialize_field("success", &true)?;
                state.serialize_field("result", result)?;
            }
            Self::Failure(error) => {
                state.serialize_field("success", &false)?;
                state.serialize_field("error", error)?;
            }
        }
        state.end()
    }
}

#[derive(Deserialize)]
struct RawOutcome {
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ServiceError>,
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Outcome<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawOutcome::deserialize(deserializer)?;
        if raw.success {
            let result = raw.result.unwrap_or(Value::Null);
            serde_json::from_value(result)
                .map(Outcome::Success)
                .map_err(serde::de::Error::custom)
        } else {
            raw.error
                .map(Outcome::Failure)
                .ok_or_else(|| serde::de::Error::missing_field("error"))
        }
    }
}

/// A request variant in an action contract table.
pub trait Action {
    /// The response enum paired with this request enum.
    type Reply: ActionReply + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Wire name of the action (`"execute_task"`, `"DB_QUERY"`, ...).
    fn action_name(&self) -> &'static str;

    /// Deadline applied when the caller does not override it.
    fn default_timeout(&self) -> Duration;

    /// A failure reply for this action, used when the handler cannot
    /// produce a typed result.
    fn failure_reply(&self, error: ServiceError) -> Self::Reply;
}

/// A response variant in an action contract table.
pub trait ActionReply {
    fn action_name(&self) -> &'static str;
}
