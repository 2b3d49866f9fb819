//! Access control for connections from untrusted clients.
//!
//! The host derives one token per app from a secret it never shares.
//! A [`DbSession`] serves a single connection: `DB_OPEN` with a valid
//! token binds it to that app, and from then on any request naming
//! another app is refused.

use harbor_ipc::{Action, DbOpen, DbRequest, DbResponse, DbSessionInfo, Outcome, ServiceError};
use harbor_types::AppId;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::proxy::DbProxy;

/// Issues and checks per-app database access tokens.
pub struct DbAccessKeys {
    secret: Vec<u8>,
}

impl DbAccessKeys {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Token that opens a connection for `app`.
    pub fn token_for(&self, app: &AppId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(b":");
        hasher.update(app.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify(&self, app: &AppId, token: &str) -> bool {
        let expected = self.token_for(app);
        expected.len() == token.len()
            && expected
                .bytes()
                .zip(token.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

impl std::fmt::Debug for DbAccessKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DbAccessKeys(<redacted>)")
    }
}

/// State of one client connection.
pub struct DbSession {
    proxy: Arc<DbProxy>,
    keys: Arc<DbAccessKeys>,
    bound: Mutex<Option<AppId>>,
}

impl DbSession {
    pub fn new(proxy: Arc<DbProxy>, keys: Arc<DbAccessKeys>) -> Self {
        Self {
            proxy,
            keys,
            bound: Mutex::new(None),
        }
    }

    /// The app this connection is bound to, once opened.
    pub fn app_id(&self) -> Option<AppId> {
        lock(&self.bound).clone()
    }

    /// Serves one request. Blocking; call from a blocking context.
    pub fn handle(&self, request: DbRequest) -> DbResponse {
        let request = match request {
            DbRequest::Open(open) => return DbResponse::Open(Outcome::from(self.open(open))),
            other => other,
        };
        match self.check(request.app_id()) {
            Ok(()) => self.proxy.handle(request),
            Err(e) => {
                warn!(
                    app = %request.app_id(),
                    action = request.action_name(),
                    error = %e,
                    "database request refused"
                );
                request.failure_reply(ServiceError::from(e))
            }
        }
    }

    fn open(&self, open: DbOpen) -> DbResult<DbSessionInfo> {
        if !self.keys.verify(&open.app_id, &open.token) {
            warn!(app = %open.app_id, "database open with invalid token");
            return Err(DbError::AccessDenied(format!(
                "invalid access token for app '{}'",
                open.app_id
            )));
        }
        let mut bound = lock(&self.bound);
        match bound.as_ref() {
            Some(current) if *current != open.app_id => Err(DbError::AccessDenied(format!(
                "connection is already bound to app '{current}'"
            ))),
            _ => {
                debug!(app = %open.app_id, "database connection opened");
                *bound = Some(open.app_id.clone());
                Ok(DbSessionInfo {
                    app_id: open.app_id,
                })
            }
        }
    }

    fn check(&self, app: &AppId) -> DbResult<()> {
        match lock(&self.bound).as_ref() {
            None => Err(DbError::AccessDenied(
                "connection has not been opened".into(),
            )),
            Some(bound) if bound != app => Err(DbError::AccessDenied(format!(
                "connection is bound to app '{bound}', not '{app}'"
            ))),
            Some(_) => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
