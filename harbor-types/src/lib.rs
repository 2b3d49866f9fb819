//! Core type definitions for harbor.
//!
//! This crate defines the small set of types that both sides of the
//! sandbox boundary agree on:
//! - Tenant, install and worker identifiers (validated slugs)
//! - Correlation identifiers for the control channel (UUID v4)
//! - The SQL data model exchanged with the database proxy
//!
//! Wire envelopes and action payloads live in `harbor-ipc`; storage
//! engines live in `harbor-db`.

mod ids;
pub mod sql;

pub use ids::{AppId, InstallId, RequestId, WorkerId};
pub use sql::{DbStep, ExecResult, QueryResult, RowMode, StepKind, StepResult};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid {kind} identifier '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },
}
