//! Stable failure codes carried in `{ success: false, error: { code } }`.
//!
//! The sandbox branches on these strings, so they never change meaning.

pub const WORKER_NOT_FOUND: &str = "WORKER_NOT_FOUND";
pub const WORKER_UNAVAILABLE: &str = "WORKER_UNAVAILABLE";
pub const APP_NOT_FOUND: &str = "APP_NOT_FOUND";
pub const APP_UNAVAILABLE: &str = "APP_UNAVAILABLE";
pub const OBJECT_NOT_FOUND: &str = "OBJECT_NOT_FOUND";
pub const UNRECOGNIZED_MIME_TYPE: &str = "UNRECOGNIZED_MIME_TYPE";
pub const STORAGE_ACCESS_FAILURE: &str = "STORAGE_ACCESS_FAILURE";
pub const WORKER_EXECUTION_FAILED: &str = "WORKER_EXECUTION_FAILED";
pub const NOT_INITIALIZED: &str = "NOT_INITIALIZED";

// Database channel
pub const CONNECTION_ERROR: &str = "CONNECTION_ERROR";
pub const QUERY_ERROR: &str = "QUERY_ERROR";
pub const TRANSACTION_ERROR: &str = "TRANSACTION_ERROR";
pub const DB_ACCESS_DENIED: &str = "DB_ACCESS_DENIED";

// Transport / correlation
pub const TIMEOUT: &str = "TIMEOUT";
pub const CHANNEL_CLOSED: &str = "CHANNEL_CLOSED";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
