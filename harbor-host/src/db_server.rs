//! Unix-socket listener for the database proxy.
//!
//! Each accepted connection speaks the database channel contract and gets
//! its own [`DbSession`], so it only ever reaches the app it opened with.
//! The proxy is synchronous, so every request runs on the blocking pool.

use async_trait::async_trait;
use harbor_db::{DbAccessKeys, DbProxy, DbSession};
use harbor_ipc::{
    Action, Connection, DbRequest, DbResponse, DbServerSide, RequestHandler, ServiceError, codes,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::HostError;

struct SessionHandler {
    session: Arc<DbSession>,
}

#[async_trait]
impl RequestHandler<DbRequest> for SessionHandler {
    async fn handle(&self, request: DbRequest) -> DbResponse {
        let fallback =
            request.failure_reply(ServiceError::new(codes::INTERNAL_ERROR, "database task failed"));
        let session = Arc::clone(&self.session);
        match tokio::task::spawn_blocking(move || session.handle(request)).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "database task failed");
                fallback
            }
        }
    }
}

pub struct DbProxyServer {
    proxy: Arc<DbProxy>,
    keys: Arc<DbAccessKeys>,
    socket_path: PathBuf,
}

impl DbProxyServer {
    pub fn new(
        proxy: Arc<DbProxy>,
        keys: Arc<DbAccessKeys>,
        socket_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            proxy,
            keys,
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket, replacing a stale one, and starts accepting.
    pub fn listen(self) -> Result<JoinHandle<()>, HostError> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => debug!(path = %self.socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "database proxy listening");
        Ok(tokio::spawn(self.accept_loop(listener)))
    }

    async fn accept_loop(self, listener: UnixListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    debug!("database client connected");
                    let handler: Arc<dyn RequestHandler<DbRequest>> = Arc::new(SessionHandler {
                        session: Arc::new(DbSession::new(
                            Arc::clone(&self.proxy),
                            Arc::clone(&self.keys),
                        )),
                    });
                    let (reader, writer) = stream.into_split();
                    let conn = Connection::<DbServerSide>::new(writer);
                    conn.serve(reader, handler, "db");
                }
                Err(e) => {
                    warn!(error = %e, "database proxy accept failed");
                }
            }
        }
    }
}
