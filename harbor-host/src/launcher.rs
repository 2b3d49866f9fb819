//! Starting the sandbox process.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::SandboxConfig;
use crate::error::HostError;

/// How a sandbox process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxExit {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl SandboxExit {
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running sandbox: its standard streams plus exit notification and
/// a kill switch.
pub struct LaunchedSandbox {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    /// Resolves once the process has exited.
    pub exited: oneshot::Receiver<SandboxExit>,
    /// Sending (or dropping) asks for the process to be killed.
    pub kill: oneshot::Sender<()>,
}

#[async_trait]
pub trait SandboxLauncher: Send + Sync + 'static {
    async fn launch(&self) -> Result<LaunchedSandbox, HostError>;
}

/// Launches the configured program as a child process.
pub struct ProcessLauncher {
    config: SandboxConfig,
}

impl ProcessLauncher {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .env_clear()
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            if let Some(uid) = self.config.uid {
                cmd.uid(uid);
            }
            if let Some(gid) = self.config.gid {
                cmd.gid(gid);
            }
        }
        cmd
    }
}

#[async_trait]
impl SandboxLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<LaunchedSandbox, HostError> {
        let mut child = self.command().spawn().map_err(|e| {
            HostError::Spawn(format!("{}: {e}", self.config.program.display()))
        })?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::Spawn("sandbox stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Spawn("sandbox stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HostError::Spawn("sandbox stderr was not captured".into()))?;

        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = &mut kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!(pid, error = %e, "failed to kill sandbox");
                    }
                    child.wait().await
                }
            };
            let exit = match status {
                Ok(status) => SandboxExit {
                    code: status.code(),
                },
                Err(e) => {
                    warn!(pid, error = %e, "failed to reap sandbox");
                    SandboxExit { code: None }
                }
            };
            let _ = exit_tx.send(exit);
        });

        info!(pid, program = %self.config.program.display(), "sandbox spawned");
        Ok(LaunchedSandbox {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exited: exit_rx,
            kill: kill_tx,
        })
    }
}
