//! Maps database-channel requests onto the proxy.

use harbor_ipc::{DbRequest, DbResponse, DbSessionInfo, Outcome};

use crate::proxy::DbProxy;

impl DbProxy {
    /// Serves one request. Blocking; call from a blocking context.
    ///
    /// In-process callers already reach every schema, so `DB_OPEN` is
    /// acknowledged without a token check. Untrusted connections go
    /// through [`crate::DbSession`] instead.
    pub fn handle(&self, request: DbRequest) -> DbResponse {
        match request {
            DbRequest::Open(open) => DbResponse::Open(Outcome::Success(DbSessionInfo {
                app_id: open.app_id,
            })),
            DbRequest::Query(statement) => DbResponse::Query(Outcome::from(
                self.execute_query_for_app(
                    &statement.app_id,
                    &statement.sql,
                    &statement.params,
                    statement.row_mode.unwrap_or_default(),
                ),
            )),
            DbRequest::Exec(statement) => DbResponse::Exec(Outcome::from(
                self.execute_exec_for_app(&statement.app_id, &statement.sql, &statement.params),
            )),
            DbRequest::Batch(batch) => DbResponse::Batch(Outcome::from(
                self.execute_batch_for_app(&batch.app_id, &batch.steps, batch.atomic),
            )),
        }
    }
}
