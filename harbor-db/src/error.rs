//! Error types for the database proxy.

use harbor_ipc::{ServiceError, codes};
use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// Opening or preparing a database file failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A statement failed.
    #[error("query error: {0}")]
    Query(String),

    /// An atomic batch failed and was rolled back.
    #[error("transaction failed at step {step}: {message}")]
    Transaction { step: usize, message: String },

    /// The connection may not act for the named app.
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("migration '{name}' failed: {message}")]
    Migration { name: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) | Self::Io(_) => codes::CONNECTION_ERROR,
            Self::Query(_) | Self::Migration { .. } => codes::QUERY_ERROR,
            Self::Transaction { .. } => codes::TRANSACTION_ERROR,
            Self::AccessDenied(_) => codes::DB_ACCESS_DENIED,
        }
    }
}

impl From<DbError> for ServiceError {
    fn from(error: DbError) -> Self {
        ServiceError::new(error.code(), error.to_string())
    }
}
