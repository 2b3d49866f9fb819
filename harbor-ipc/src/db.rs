//! Database channel contract.
//!
//! A separate socket from the control channel. A connection starts with
//! `DB_OPEN`, which presents a host-issued access token for one app and
//! binds the connection to it. Every later request still names its app;
//! the server refuses any that names a different one, so a statement
//! never reaches another app's tables.

use harbor_types::{AppId, DbStep, ExecResult, QueryResult, RowMode, StepResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::connection::Side;
use crate::envelope::{Action, ActionReply, Outcome, ServiceError};

const DB_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStatement {
    pub app_id: AppId,
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_mode: Option<RowMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbBatch {
    pub app_id: AppId,
    pub steps: Vec<DbStep>,
    /// All steps commit together or none do.
    #[serde(default)]
    pub atomic: bool,
}

/// Binds a connection to one app.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbOpen {
    pub app_id: AppId,
    pub token: String,
}

impl std::fmt::Debug for DbOpen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbOpen")
            .field("app_id", &self.app_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSessionInfo {
    pub app_id: AppId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload")]
pub enum DbRequest {
    #[serde(rename = "DB_OPEN")]
    Open(DbOpen),
    #[serde(rename = "DB_QUERY")]
    Query(DbStatement),
    #[serde(rename = "DB_EXEC")]
    Exec(DbStatement),
    #[serde(rename = "DB_BATCH")]
    Batch(DbBatch),
}

impl DbRequest {
    pub fn app_id(&self) -> &AppId {
        match self {
            Self::Open(open) => &open.app_id,
            Self::Query(statement) | Self::Exec(statement) => &statement.app_id,
            Self::Batch(batch) => &batch.app_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload")]
pub enum DbResponse {
    #[serde(rename = "DB_OPEN")]
    Open(Outcome<DbSessionInfo>),
    #[serde(rename = "DB_QUERY")]
    Query(Outcome<QueryResult>),
    #[serde(rename = "DB_EXEC")]
    Exec(Outcome<ExecResult>),
    #[serde(rename = "DB_BATCH")]
    Batch(Outcome<Vec<StepResult>>),
}

impl Action for DbRequest {
    type Reply = DbResponse;

    fn action_name(&self) -> &'static str {
        match self {
            Self::Open(_) => "DB_OPEN",
            Self::Query(_) => "DB_QUERY",
            Self::Exec(_) => "DB_EXEC",
            Self::Batch(_) => "DB_BATCH",
        }
    }

    /// Every database action shares one fixed deadline.
    fn default_timeout(&self) -> Duration {
        DB_TIMEOUT
    }

    fn failure_reply(&self, error: ServiceError) -> DbResponse {
        match self {
            Self::Open(_) => DbResponse::Open(Outcome::Failure(error)),
            Self::Query(_) => DbResponse::Query(Outcome::Failure(error)),
            Self::Exec(_) => DbResponse::Exec(Outcome::Failure(error)),
            Self::Batch(_) => DbResponse::Batch(Outcome::Failure(error)),
        }
    }
}

impl ActionReply for DbResponse {
    fn action_name(&self) -> &'static str {
        match self {
            Self::Open(_) => "DB_OPEN",
            Self::Query(_) => "DB_QUERY",
            Self::Exec(_) => "DB_EXEC",
            Self::Batch(_) => "DB_BATCH",
        }
    }
}

/// A direction that carries no requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NoRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NoReply {}

impl Action for NoRequest {
    type Reply = NoReply;

    fn action_name(&self) -> &'static str {
        match *self {}
    }

    fn default_timeout(&self) -> Duration {
        match *self {}
    }

    fn failure_reply(&self, _error: ServiceError) -> NoReply {
        match *self {}
    }
}

impl ActionReply for NoReply {
    fn action_name(&self) -> &'static str {
        match *self {}
    }
}

/// A database client: issues [`DbRequest`], serves nothing.
#[derive(Debug)]
pub struct DbClientSide;

impl Side for DbClientSide {
    const PEER: &'static str = "db-proxy";
    type Outbound = DbRequest;
    type Inbound = NoRequest;
}

/// The database proxy: serves [`DbRequest`], issues nothing.
#[derive(Debug)]
pub struct DbServerSide;

impl Side for DbServerSide {
    const PEER: &'static str = "db-client";
    type Outbound = NoRequest;
    type Inbound = DbRequest;
}
