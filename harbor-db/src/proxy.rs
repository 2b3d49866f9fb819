//! Schema-isolated SQLite proxy.

use harbor_types::{AppId, DbStep, ExecResult, QueryResult, RowMode, StepKind, StepResult};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::authorizer;
use crate::error::{DbError, DbResult};
use crate::migrations::Migration;
use crate::values::{from_sql_ref, to_sql_value};

/// Alias under which the shared extensions database is attached.
pub const EXTENSIONS_ALIAS: &str = "extensions";

const HOST_FILE: &str = "host.sqlite";
const EXTENSIONS_FILE: &str = "extensions.sqlite";
const APPS_DIR: &str = "apps";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A registered application schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSchema {
    pub app_id: AppId,
    pub file_name: String,
    pub created_at_ms: i64,
}

/// Routes statements to per-application databases.
pub struct DbProxy {
    root: PathBuf,
    host: Arc<Mutex<Connection>>,
    apps: Mutex<HashMap<AppId, Arc<Mutex<Connection>>>>,
}

impl DbProxy {
    /// Opens (or creates) the proxy's data directory.
    pub fn open(root: impl AsRef<Path>) -> DbResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(APPS_DIR))?;

        let conn = Connection::open(root.join(HOST_FILE))
            .map_err(|e| DbError::Connection(format!("failed to open host schema: {e}")))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| DbError::Connection(e.to_string()))?;
        conn.execute(
            "ATTACH DATABASE ?1 AS extensions",
            [root.join(EXTENSIONS_FILE).to_string_lossy().into_owned()],
        )
        .map_err(|e| DbError::Connection(format!("failed to attach extensions: {e}")))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS app_schemas (
                app_id TEXT PRIMARY KEY,
                file_name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            ",
        )
        .map_err(|e| DbError::Connection(format!("failed to init host schema: {e}")))?;

        info!(root = %root.display(), "database proxy opened");
        Ok(Self {
            root,
            host: Arc::new(Mutex::new(conn)),
            apps: Mutex::new(HashMap::new()),
        })
    }

    /// Registers and opens the application's schema. Returns true when it
    /// was created by this call.
    pub fn ensure_app_schema(&self, app: &AppId) -> DbResult<bool> {
        let mut apps = lock(&self.apps);
        if apps.contains_key(app) {
            return Ok(false);
        }

        let created = self.with_host(|host| {
            host.execute(
                "INSERT OR IGNORE INTO app_schemas (app_id, file_name, created_at) VALUES (?1, ?2, ?3)",
                params![app.as_str(), app_file_name(app), now_millis()],
            )
        })? == 1;

        let conn = self.open_app_connection(app)?;
        apps.insert(app.clone(), Arc::new(Mutex::new(conn)));
        if created {
            info!(app = %app, "created app schema");
        }
        Ok(created)
    }

    /// Removes the application's schema and its files. Returns false when
    /// the application had no schema.
    pub fn drop_app_schema(&self, app: &AppId) -> DbResult<bool> {
        let mut apps = lock(&self.apps);
        apps.remove(app);

        let removed = self.with_host(|host| {
            host.execute("DELETE FROM app_schemas WHERE app_id = ?1", [app.as_str()])
        })? == 1;

        let path = self.app_path(app);
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if removed {
            info!(app = %app, "dropped app schema");
        }
        Ok(removed)
    }

    pub fn execute_query_for_app(
        &self,
        app: &AppId,
        sql: &str,
        params: &[Value],
        mode: RowMode,
    ) -> DbResult<QueryResult> {
        let handle = self.app_connection(app)?;
        let conn = lock(&handle);
        debug!(app = %app, "query");
        run_query(&conn, sql, params, mode).map_err(|e| DbError::Query(e.to_string()))
    }

    pub fn execute_exec_for_app(
        &self,
        app: &AppId,
        sql: &str,
        params: &[Value],
    ) -> DbResult<ExecResult> {
        let handle = self.app_connection(app)?;
        let conn = lock(&handle);
        debug!(app = %app, "exec");
        run_exec(&conn, sql, params).map_err(|e| DbError::Query(e.to_string()))
    }

    /// Runs `steps` in order. An atomic batch commits all steps or none;
    /// a non-atomic batch stops at the first failure, keeping earlier steps.
    pub fn execute_batch_for_app(
        &self,
        app: &AppId,
        steps: &[DbStep],
        atomic: bool,
    ) -> DbResult<Vec<StepResult>> {
        let handle = self.app_connection(app)?;
        let conn = lock(&handle);
        debug!(app = %app, steps = steps.len(), atomic, "batch");

        if !atomic {
            return steps
                .iter()
                .enumerate()
                .map(|(i, step)| {
                    run_step(&conn, step).map_err(|e| DbError::Query(format!("step {i}: {e}")))
                })
                .collect();
        }

        begin(&conn).map_err(|e| DbError::Transaction {
            step: 0,
            message: e.to_string(),
        })?;
        let mut results = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            match run_step(&conn, step) {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(app = %app, step = i, error = %e, "batch rolled back");
                    rollback(&conn);
                    return Err(DbError::Transaction {
                        step: i,
                        message: e.to_string(),
                    });
                }
            }
        }
        commit(&conn).map_err(|e| DbError::Transaction {
            step: steps.len(),
            message: e.to_string(),
        })?;
        Ok(results)
    }

    /// Applies each migration not yet recorded, each in its own
    /// transaction. Returns the names applied by this call.
    pub fn run_app_migrations(&self, app: &AppId, migrations: &[Migration]) -> DbResult<Vec<String>> {
        let handle = self.app_connection(app)?;
        let conn = lock(&handle);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _harbor_migrations (
                name TEXT PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );",
        )
        .map_err(|e| DbError::Query(format!("failed to init migration table: {e}")))?;

        let mut applied = Vec::new();
        for migration in migrations {
            let failed = |e: rusqlite::Error| DbError::Migration {
                name: migration.name.clone(),
                message: e.to_string(),
            };

            let done: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM _harbor_migrations WHERE name = ?1",
                    [&migration.name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(failed)?;
            if done.is_some() {
                continue;
            }

            begin(&conn).map_err(failed)?;
            let applied_now = conn.execute_batch(&migration.sql).and_then(|()| {
                conn.execute(
                    "INSERT INTO _harbor_migrations (name, applied_at) VALUES (?1, ?2)",
                    params![migration.name, now_millis()],
                )
            });
            if let Err(e) = applied_now {
                rollback(&conn);
                return Err(failed(e));
            }
            commit(&conn).map_err(failed)?;

            info!(app = %app, migration = %migration.name, "applied migration");
            applied.push(migration.name.clone());
        }
        Ok(applied)
    }

    /// Lists registered application schemas.
    pub fn app_schemas(&self) -> DbResult<Vec<AppSchema>> {
        let rows = self.with_host(|host| {
            let mut stmt = host.prepare(
                "SELECT app_id, file_name, created_at FROM app_schemas ORDER BY app_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(|(app_id, file_name, created_at_ms)| {
                Ok(AppSchema {
                    app_id: AppId::parse(&app_id).map_err(|e| DbError::Query(e.to_string()))?,
                    file_name,
                    created_at_ms,
                })
            })
            .collect()
    }

    /// Runs `f` against the host schema, which has `extensions` attached
    /// read-write. Never reachable from an application connection.
    pub fn with_host<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> DbResult<T> {
        let conn = lock(&self.host);
        f(&conn).map_err(|e| DbError::Query(e.to_string()))
    }

    fn app_connection(&self, app: &AppId) -> DbResult<Arc<Mutex<Connection>>> {
        if let Some(conn) = lock(&self.apps).get(app) {
            return Ok(Arc::clone(conn));
        }
        self.ensure_app_schema(app)?;
        lock(&self.apps)
            .get(app)
            .cloned()
            .ok_or_else(|| DbError::Connection(format!("schema for '{app}' disappeared")))
    }

    fn open_app_connection(&self, app: &AppId) -> DbResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(self.app_path(app), flags)
            .map_err(|e| DbError::Connection(format!("failed to open schema for '{app}': {e}")))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| DbError::Connection(e.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let extensions = format!(
            "file:{}?mode=ro",
            self.root.join(EXTENSIONS_FILE).to_string_lossy()
        );
        conn.execute("ATTACH DATABASE ?1 AS extensions", [extensions])
            .map_err(|e| DbError::Connection(format!("failed to attach extensions: {e}")))?;

        authorizer::install(&conn);
        Ok(conn)
    }

    fn app_path(&self, app: &AppId) -> PathBuf {
        self.root.join(APPS_DIR).join(app_file_name(app))
    }
}

fn app_file_name(app: &AppId) -> String {
    format!("app_{app}.sqlite")
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn begin(conn: &Connection) -> rusqlite::Result<()> {
    authorizer::transaction_control(|| conn.execute_batch("BEGIN"))
}

/// A failed `COMMIT` leaves the transaction open, so it is rolled back.
fn commit(conn: &Connection) -> rusqlite::Result<()> {
    authorizer::transaction_control(|| conn.execute_batch("COMMIT"))
        .inspect_err(|_| rollback(conn))
}

fn rollback(conn: &Connection) {
    if conn.is_autocommit() {
        return;
    }
    if let Err(e) = authorizer::transaction_control(|| conn.execute_batch("ROLLBACK")) {
        warn!(error = %e, "rollback failed");
    }
}

fn run_step(conn: &Connection, step: &DbStep) -> rusqlite::Result<StepResult> {
    match step.kind {
        StepKind::Query => run_query(
            conn,
            &step.sql,
            &step.params,
            step.row_mode.unwrap_or_default(),
        )
        .map(StepResult::Query),
        StepKind::Exec => run_exec(conn, &step.sql, &step.params).map(StepResult::Exec),
    }
}

fn run_query(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    mode: RowMode,
) -> rusqlite::Result<QueryResult> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter().map(to_sql_value)))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|i| row.get_ref(i).map(from_sql_ref))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.push(match mode {
            RowMode::Array => Value::Array(values),
            RowMode::Object => Value::Object(columns.iter().cloned().zip(values).collect()),
        });
    }

    Ok(QueryResult { columns, rows: out })
}

fn run_exec(conn: &Connection, sql: &str, params: &[Value]) -> rusqlite::Result<ExecResult> {
    let mut stmt = conn.prepare(sql)?;
    let params = params_from_iter(params.iter().map(to_sql_value));
    if stmt.column_count() == 0 {
        let changes = stmt.execute(params)?;
        return Ok(ExecResult {
            changes: changes as u64,
            last_insert_id: conn.last_insert_rowid(),
        });
    }
    // `RETURNING` rows are drained and dropped; the change count is only
    // final once the statement has run to completion.
    let mut rows = stmt.query(params)?;
    while rows.next()?.is_some() {}
    drop(rows);
    Ok(ExecResult {
        changes: conn.changes(),
        last_insert_id: conn.last_insert_rowid(),
    })
}
