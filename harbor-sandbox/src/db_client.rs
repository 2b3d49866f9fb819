//! Client for the database proxy, used by worker runtimes.
//!
//! A connection is opened with the app's host-issued token before any
//! statement is sent; the proxy refuses every other app from then on.
//! `query`/`exec` route by the statement's leading keyword. A
//! transaction body runs against a [`TransactionRecorder`]: nothing is
//! sent while it runs, and on success every recorded step goes out as
//! one atomic `DB_BATCH`.

use async_trait::async_trait;
use harbor_ipc::{
    ActionReply, Connection, DbBatch, DbClientSide, DbOpen, DbRequest, DbResponse, DbStatement,
    IpcError, IpcResult,
};
use harbor_types::{AppId, DbStep, ExecResult, QueryResult, RowMode, StepKind, StepResult};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Carries database requests to the proxy.
#[async_trait]
pub trait DbTransport: Send + Sync + 'static {
    async fn request(&self, request: DbRequest) -> IpcResult<DbResponse>;
}

#[async_trait]
impl DbTransport for Connection<DbClientSide> {
    async fn request(&self, request: DbRequest) -> IpcResult<DbResponse> {
        self.call(request).await
    }
}

#[derive(Clone)]
pub struct DbClient {
    transport: Arc<dyn DbTransport>,
    app_id: AppId,
}

impl DbClient {
    pub fn new(transport: Arc<dyn DbTransport>, app_id: AppId) -> Self {
        Self { transport, app_id }
    }

    /// Connects to the proxy's Unix socket and opens it for `app_id`.
    #[cfg(unix)]
    pub async fn connect(
        socket: &std::path::Path,
        app_id: AppId,
        token: &str,
    ) -> IpcResult<Self> {
        let stream = tokio::net::UnixStream::connect(socket).await?;
        let (reader, writer) = stream.into_split();
        let conn = Connection::<DbClientSide>::new(writer);
        conn.serve(reader, Arc::new(NoInbound), "db");
        let client = Self::new(conn, app_id);
        client.open(token).await?;
        Ok(client)
    }

    /// Binds the transport to this client's app.
    pub async fn open(&self, token: &str) -> IpcResult<()> {
        let request = DbRequest::Open(DbOpen {
            app_id: self.app_id.clone(),
            token: token.to_string(),
        });
        match self.transport.request(request).await? {
            DbResponse::Open(outcome) => outcome.into_result().map(|_| ()),
            other => Err(unexpected("DB_OPEN", &other)),
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Runs a statement and returns its rows as objects. A statement that
    /// does not produce rows runs as an exec and yields no rows.
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> IpcResult<QueryResult> {
        self.query_with_mode(sql, params, RowMode::Object).await
    }

    pub async fn query_with_mode(
        &self,
        sql: &str,
        params: Vec<Value>,
        mode: RowMode,
    ) -> IpcResult<QueryResult> {
        match self.run(sql, params, mode).await? {
            StepResult::Query(result) => Ok(result),
            StepResult::Exec(_) => Ok(QueryResult::default()),
        }
    }

    /// Runs a statement for its effect. A row-producing statement runs as
    /// a query and reports no changes.
    pub async fn exec(&self, sql: &str, params: Vec<Value>) -> IpcResult<ExecResult> {
        match self.run(sql, params, RowMode::Object).await? {
            StepResult::Exec(result) => Ok(result),
            StepResult::Query(_) => Ok(ExecResult::default()),
        }
    }

    /// Runs `body` against a recorder, then sends the recorded steps as
    /// one atomic batch. An error from `body` sends nothing.
    pub async fn transaction<T, E, F>(&self, body: F) -> Result<(T, Vec<StepResult>), E>
    where
        F: FnOnce(&mut TransactionRecorder) -> Result<T, E>,
        E: From<IpcError>,
    {
        let mut recorder = TransactionRecorder::default();
        let value = body(&mut recorder)?;
        if recorder.is_empty() {
            return Ok((value, Vec::new()));
        }
        debug!(app = %self.app_id, steps = recorder.len(), "committing transaction");
        let request = DbRequest::Batch(DbBatch {
            app_id: self.app_id.clone(),
            steps: recorder.steps,
            atomic: true,
        });
        let results = match self.transport.request(request).await? {
            DbResponse::Batch(outcome) => outcome.into_result()?,
            other => return Err(unexpected("DB_BATCH", &other).into()),
        };
        Ok((value, results))
    }

    async fn run(&self, sql: &str, params: Vec<Value>, mode: RowMode) -> IpcResult<StepResult> {
        let statement = DbStatement {
            app_id: self.app_id.clone(),
            sql: sql.to_string(),
            params,
            row_mode: (mode != RowMode::Object).then_some(mode),
        };
        match StepKind::classify(sql) {
            StepKind::Query => match self.transport.request(DbRequest::Query(statement)).await? {
                DbResponse::Query(outcome) => outcome.into_result().map(StepResult::Query),
                other => Err(unexpected("DB_QUERY", &other)),
            },
            StepKind::Exec => match self.transport.request(DbRequest::Exec(statement)).await? {
                DbResponse::Exec(outcome) => outcome.into_result().map(StepResult::Exec),
                other => Err(unexpected("DB_EXEC", &other)),
            },
        }
    }
}

fn unexpected(expected: &'static str, got: &DbResponse) -> IpcError {
    IpcError::UnexpectedResponse {
        expected,
        got: got.action_name(),
    }
}

/// Collects the statements of a transaction body.
#[derive(Debug, Default)]
pub struct TransactionRecorder {
    steps: Vec<DbStep>,
}

impl TransactionRecorder {
    pub fn query(&mut self, sql: &str, params: Vec<Value>) -> &mut Self {
        self.steps.push(DbStep::new(sql, params));
        self
    }

    pub fn query_as_arrays(&mut self, sql: &str, params: Vec<Value>) -> &mut Self {
        self.steps
            .push(DbStep::new(sql, params).with_row_mode(RowMode::Array));
        self
    }

    pub fn exec(&mut self, sql: &str, params: Vec<Value>) -> &mut Self {
        self.steps.push(DbStep::new(sql, params));
        self
    }

    pub fn steps(&self) -> &[DbStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(unix)]
struct NoInbound;

#[cfg(unix)]
#[async_trait]
impl harbor_ipc::RequestHandler<harbor_ipc::db::NoRequest> for NoInbound {
    async fn handle(&self, request: harbor_ipc::db::NoRequest) -> harbor_ipc::db::NoReply {
        match request {}
    }
}
