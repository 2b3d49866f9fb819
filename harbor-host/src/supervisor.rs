//! Sandbox process supervision.
//!
//! ```text
//!  NotStarted ──start──▶ Spawning ──▶ Initializing ──init ok──▶ Ready
//!                           ▲               │                    │
//!                           │          init failed: kill         │ crash
//!                           │               ▼                    ▼
//!                           └── backoff ── RestartPending ◀──────┘
//!
//!  clean exit ▶ Exited          shutdown() from anywhere ▶ Stopped
//! ```
//!
//! Every launched child gets a generation number. An exit notification
//! for anything but the current generation is ignored, and a guard flag
//! ensures a crash schedules at most one restart.

use futures::future::BoxFuture;
use harbor_db::DbAccessKeys;
use harbor_ipc::{
    AnalyzeObjectPayload, ContentMetadata, ExecutionOptions, HostRequest, HostSide, InitPayload,
    MappingAck, RequestHandler,
};
use harbor_ipc::Connection;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::SandboxClient;
use crate::config::HostConfig;
use crate::dispatcher::HostDispatcher;
use crate::error::HostError;
use crate::launcher::{SandboxExit, SandboxLauncher};
use crate::services::HostServices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Spawning,
    Initializing,
    Ready,
    RestartPending,
    /// The child exited cleanly, or a restart could not launch it.
    Exited,
    /// Terminal; nothing is launched again.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub restart_backoff: Duration,
    pub init_timeout: Duration,
    pub options: ExecutionOptions,
    pub base_url: String,
    pub db_socket: Option<PathBuf>,
    /// Issues the per-app tokens workers present on the database socket.
    pub db_access: Option<Arc<DbAccessKeys>>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            restart_backoff: Duration::from_secs(5),
            init_timeout: Duration::from_secs(30),
            options: ExecutionOptions::default(),
            base_url: "http://localhost:8080".into(),
            db_socket: None,
            db_access: None,
        }
    }
}

impl SupervisorSettings {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            restart_backoff: config.supervisor.restart_backoff(),
            init_timeout: config.supervisor.init_timeout(),
            options: ExecutionOptions::from(&config.execution),
            base_url: config.base_url.clone(),
            db_socket: config.database.socket_path.clone(),
            db_access: None,
        }
    }
}

struct ChildSlot {
    generation: u64,
    client: SandboxClient,
    kill: Option<oneshot::Sender<()>>,
    readers: Vec<JoinHandle<()>>,
}

struct Inner {
    launcher: Arc<dyn SandboxLauncher>,
    dispatcher: Arc<HostDispatcher>,
    settings: SupervisorSettings,
    state: watch::Sender<SupervisorState>,
    child: Mutex<Option<ChildSlot>>,
    generation: AtomicU64,
    restart_scheduled: AtomicBool,
    launches: AtomicU64,
}

/// Owns the sandbox process and keeps it running.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn SandboxLauncher>,
        services: Arc<dyn HostServices>,
        settings: SupervisorSettings,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::NotStarted);
        let mut dispatcher = HostDispatcher::new(services);
        if let Some(keys) = &settings.db_access {
            dispatcher = dispatcher.with_db_access(Arc::clone(keys));
        }
        Self {
            inner: Arc::new(Inner {
                launcher,
                dispatcher: Arc::new(dispatcher),
                settings,
                state,
                child: Mutex::new(None),
                generation: AtomicU64::new(0),
                restart_scheduled: AtomicBool::new(false),
                launches: AtomicU64::new(0),
            }),
        }
    }

    /// Launches and initializes the sandbox.
    ///
    /// On an init failure the child is killed and its exit schedules a
    /// restart like any other crash; the error is still returned here.
    pub async fn start(&self) -> Result<(), HostError> {
        match self.state() {
            SupervisorState::Stopped => Err(HostError::Stopped),
            SupervisorState::NotStarted | SupervisorState::Exited => self.inner.launch().await,
            _ => Ok(()),
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.inner.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SupervisorState::Ready
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.inner.state.subscribe()
    }

    /// Number of children launched so far.
    pub fn launch_count(&self) -> u64 {
        self.inner.launches.load(Ordering::SeqCst)
    }

    /// Client for the running sandbox, only while Ready.
    pub fn client(&self) -> Result<SandboxClient, HostError> {
        let state = self.state();
        if state != SupervisorState::Ready {
            return Err(HostError::NotReady(state));
        }
        self.inner
            .child()
            .as_ref()
            .map(|slot| slot.client.clone())
            .ok_or(HostError::NotReady(state))
    }

    pub fn dispatcher(&self) -> &Arc<HostDispatcher> {
        &self.inner.dispatcher
    }

    /// Analyses an object in the sandbox and persists its metadata.
    pub async fn analyze_object(
        &self,
        request: AnalyzeObjectPayload,
    ) -> Result<ContentMetadata, HostError> {
        let client = self.client()?;
        self.inner.dispatcher.analyze_object(&client, request).await
    }

    /// Re-reads the install mapping and pushes it to the sandbox.
    pub async fn refresh_install_mapping(&self) -> Result<MappingAck, HostError> {
        let mapping = self.inner.dispatcher.services().install_mapping().await?;
        let client = self.client()?;
        let ack = client.update_app_install_id_mapping(mapping).await?;
        info!(apps = ack.apps, "install mapping pushed to sandbox");
        Ok(ack)
    }

    /// Stops supervising and kills the child. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.state.send_replace(SupervisorState::Stopped);
        let slot = self.inner.child().take();
        if let Some(mut slot) = slot {
            info!(generation = slot.generation, "stopping sandbox");
            slot.client.close();
            if let Some(kill) = slot.kill.take() {
                let _ = kill.send(());
            }
            for reader in slot.readers {
                reader.abort();
            }
        }
    }

    /// Waits for Ctrl-C or SIGTERM, then shuts down.
    pub async fn shutdown_on_signal(&self) -> Result<(), HostError> {
        wait_for_signal().await?;
        info!("shutdown signal received");
        self.shutdown().await;
        Ok(())
    }
}

impl Inner {
    async fn launch(self: &Arc<Self>) -> Result<(), HostError> {
        if !self.set_state(SupervisorState::Spawning) {
            return Err(HostError::Stopped);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let launched = match self.launcher.launch().await {
            Ok(launched) => launched,
            Err(e) => {
                error!(error = %e, "failed to launch sandbox");
                self.set_state(SupervisorState::Exited);
                return Err(e);
            }
        };
        self.launches.fetch_add(1, Ordering::SeqCst);

        let conn = Connection::<HostSide>::new(launched.stdin);
        let handler: Arc<dyn RequestHandler<HostRequest>> = self.dispatcher.clone();
        let readers = vec![
            conn.serve(launched.stdout, Arc::clone(&handler), "stdout"),
            conn.serve(launched.stderr, handler, "stderr"),
        ];
        let client = SandboxClient::new(conn);

        *self.child() = Some(ChildSlot {
            generation,
            client: client.clone(),
            kill: Some(launched.kill),
            readers,
        });

        let exited = launched.exited;
        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            let exit = exited.await.unwrap_or(SandboxExit { code: None });
            watcher.on_exit(generation, exit);
        });

        if !self.set_state(SupervisorState::Initializing) {
            return Err(HostError::Stopped);
        }

        let install_mapping = match self.dispatcher.services().install_mapping().await {
            Ok(mapping) => mapping,
            Err(e) => {
                warn!(error = %e, "install mapping unavailable, initializing with none");
                Default::default()
            }
        };
        let payload = InitPayload {
            install_mapping,
            options: self.settings.options.clone(),
            base_url: self.settings.base_url.clone(),
            db_socket: self.settings.db_socket.clone(),
        };

        match client.init_with_timeout(payload, self.settings.init_timeout).await {
            Ok(result) => {
                let current = self.generation.load(Ordering::SeqCst) == generation;
                let promoted = current
                    && self.state.send_if_modified(|state| {
                        if *state == SupervisorState::Initializing {
                            *state = SupervisorState::Ready;
                            true
                        } else {
                            false
                        }
                    });
                if promoted {
                    info!(generation, sandbox = %result.worker_id, "sandbox ready");
                }
                Ok(())
            }
            Err(e) => {
                error!(generation, error = %e, "sandbox init failed, killing child");
                self.kill(generation);
                Err(HostError::InitializationFailed(e))
            }
        }
    }

    fn on_exit(self: &Arc<Self>, generation: u64, exit: SandboxExit) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "ignoring exit of a replaced sandbox");
            return;
        }
        {
            let mut child = self.child();
            if child.as_ref().map(|slot| slot.generation) == Some(generation) {
                if let Some(slot) = child.take() {
                    slot.client.close();
                }
            }
        }
        if self.is_stopped() {
            debug!(generation, "sandbox exited after shutdown");
            return;
        }
        if exit.is_clean() {
            info!(generation, "sandbox exited cleanly");
            self.set_state(SupervisorState::Exited);
            return;
        }

        warn!(generation, code = ?exit.code, "sandbox crashed");
        if self.restart_scheduled.swap(true, Ordering::SeqCst) {
            debug!(generation, "restart already scheduled");
            return;
        }
        self.set_state(SupervisorState::RestartPending);

        let inner = Arc::clone(self);
        let restart: BoxFuture<'static, ()> = Box::pin(async move {
            tokio::time::sleep(inner.settings.restart_backoff).await;
            inner.restart_scheduled.store(false, Ordering::SeqCst);
            if inner.is_stopped() {
                return;
            }
            info!("restarting sandbox");
            if let Err(e) = inner.launch().await {
                warn!(error = %e, "sandbox restart did not complete");
            }
        });
        tokio::spawn(restart);
    }

    fn kill(&self, generation: u64) {
        let mut child = self.child();
        if let Some(slot) = child.as_mut().filter(|slot| slot.generation == generation) {
            if let Some(kill) = slot.kill.take() {
                let _ = kill.send(());
            }
        }
    }

    /// Moves to `next` unless stopped. Returns false when stopped.
    fn set_state(&self, next: SupervisorState) -> bool {
        let mut stopped = false;
        self.state.send_if_modified(|state| {
            if *state == SupervisorState::Stopped {
                stopped = true;
                false
            } else if *state == next {
                false
            } else {
                debug!(from = ?*state, to = ?next, "supervisor state");
                *state = next;
                true
            }
        });
        !stopped
    }

    fn is_stopped(&self) -> bool {
        *self.state.borrow() == SupervisorState::Stopped
    }

    fn child(&self) -> MutexGuard<'_, Option<ChildSlot>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
