//! Error types for the host.

use harbor_db::DbError;
use harbor_ipc::IpcError;
use thiserror::Error;

use crate::services::ServiceFailure;
use crate::supervisor::SupervisorState;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("sandbox is not ready (state: {0:?})")]
    NotReady(SupervisorState),

    #[error("supervisor has been stopped")]
    Stopped,

    #[error("failed to spawn sandbox: {0}")]
    Spawn(String),

    #[error("sandbox initialization failed: {0}")]
    InitializationFailed(IpcError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("host service error: {0}")]
    Service(#[from] ServiceFailure),

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
