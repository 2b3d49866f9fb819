//! Runs worker code.
//!
//! A worker is an executable. It receives one JSON [`WorkerInvocation`]
//! on stdin and answers with one JSON document on stdout. Its stderr is
//! forwarded to the log, one line per event.

use async_trait::async_trait;
use harbor_ipc::{WorkerExecConfig, WorkerHttpRequest};
use serde::Serialize;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::SandboxError;
use crate::state::SandboxState;

/// Input written to a worker's stdin.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkerInvocation {
    Http {
        request: WorkerHttpRequest,
    },
    #[serde(rename_all = "camelCase")]
    Task {
        task_name: String,
        input: Value,
    },
    System {
        request: WorkerHttpRequest,
    },
}

impl WorkerInvocation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Task { .. } => "task",
            Self::System { .. } => "system",
        }
    }
}

#[async_trait]
pub trait WorkerRunner: Send + Sync + 'static {
    async fn invoke(
        &self,
        config: &WorkerExecConfig,
        invocation: &WorkerInvocation,
    ) -> Result<Value, SandboxError>;
}

/// Spawns one process per invocation.
pub struct ProcessWorkerRunner {
    state: Arc<SandboxState>,
}

impl ProcessWorkerRunner {
    pub fn new(state: Arc<SandboxState>) -> Self {
        Self { state }
    }

    fn command(&self, config: &WorkerExecConfig) -> Command {
        let mut command = Command::new(&config.entrypoint);
        command
            .args(&config.args)
            .env_clear()
            .envs(&config.env)
            .env("HARBOR_APP_ID", config.app_id.as_str())
            .env("HARBOR_INSTALL_ID", config.install_id.as_str())
            .env("HARBOR_WORKER_ID", config.worker_id.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(base_url) = self.state.base_url() {
            command.env("HARBOR_BASE_URL", base_url);
        }
        if let Some(socket) = self.state.db_socket() {
            command.env("HARBOR_DB_SOCKET", socket);
            if let Some(token) = &config.db_token {
                command.env("HARBOR_DB_TOKEN", token);
            }
        }
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

#[async_trait]
impl WorkerRunner for ProcessWorkerRunner {
    async fn invoke(
        &self,
        config: &WorkerExecConfig,
        invocation: &WorkerInvocation,
    ) -> Result<Value, SandboxError> {
        let options = self.state.options().ok_or(SandboxError::NotInitialized)?;
        let timeout_ms = config.timeout_ms.unwrap_or(options.worker_timeout_ms);
        let input = serde_json::to_vec(invocation)?;

        let mut child = self.command(config).spawn().map_err(|e| {
            SandboxError::Worker(format!("failed to start '{}': {e}", config.entrypoint))
        })?;
        debug!(
            app = %config.app_id,
            worker = %config.worker_id,
            kind = invocation.kind(),
            "worker started"
        );

        let (Some(mut stdin), Some(mut stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(SandboxError::Worker("worker stdio unavailable".into()));
        };
        let logs = tokio::spawn(forward_stderr(
            stderr,
            config.app_id.to_string(),
            config.worker_id.to_string(),
        ));

        let run = async {
            let write = async move {
                match stdin.write_all(&input).await {
                    // A worker may ignore its input.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                }
            };
            let read = async {
                let mut output = Vec::new();
                stdout.read_to_end(&mut output).await.map(|_| output)
            };
            let (written, output) = tokio::join!(write, read);
            written?;
            let output = output?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, output))
        };

        let result = tokio::time::timeout(Duration::from_millis(timeout_ms), run).await;
        let (status, output) = match result {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(SandboxError::Worker(format!("worker I/O failed: {e}")));
            }
            Err(_) => {
                warn!(app = %config.app_id, worker = %config.worker_id, timeout_ms, "worker timed out");
                let _ = child.kill().await;
                logs.abort();
                return Err(SandboxError::Worker(format!(
                    "worker timed out after {timeout_ms}ms"
                )));
            }
        };
        let _ = logs.await;

        if !status.success() {
            return Err(SandboxError::Worker(format!("worker exited with {status}")));
        }
        if output.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&output)
            .map_err(|e| SandboxError::Worker(format!("invalid worker output: {e}")))
    }
}

async fn forward_stderr<R>(stderr: R, app: String, worker: String)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: "harbor::worker", app = %app, worker = %worker, "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "worker stderr closed");
                break;
            }
        }
    }
}
