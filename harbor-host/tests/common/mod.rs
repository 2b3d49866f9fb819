//! In-memory sandbox double for host tests.

#![allow(dead_code)]

use async_trait::async_trait;
use harbor_host::{HostError, LaunchedSandbox, SandboxExit, SandboxLauncher};
use harbor_ipc::{
    ContentMetadata, Connection, InitResult, InstallMapping, MappingAck, Outcome, RequestHandler,
    SandboxRequest, SandboxResponse, SandboxSide, codes,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    Succeed,
    Fail,
    Hang,
}

/// What the fake sandboxes have been told, across all launches.
#[derive(Default)]
pub struct Observed {
    pub init_mappings: Mutex<Vec<InstallMapping>>,
    pub mapping_updates: Mutex<Vec<InstallMapping>>,
    pub analyze_calls: AtomicUsize,
}

struct FakeSandbox {
    id: usize,
    mode: InitMode,
    observed: Arc<Observed>,
}

#[async_trait]
impl RequestHandler<SandboxRequest> for FakeSandbox {
    async fn handle(&self, request: SandboxRequest) -> SandboxResponse {
        match request {
            SandboxRequest::Init(payload) => match self.mode {
                InitMode::Succeed => {
                    self.observed
                        .init_mappings
                        .lock()
                        .unwrap()
                        .push(payload.install_mapping);
                    SandboxResponse::Init(Outcome::Success(InitResult {
                        worker_id: format!("fake-{}", self.id),
                    }))
                }
                InitMode::Fail => {
                    SandboxResponse::Init(Outcome::failure(codes::INTERNAL_ERROR, "init refused"))
                }
                InitMode::Hang => std::future::pending().await,
            },
            SandboxRequest::UpdateAppInstallIdMapping(mapping) => {
                let apps = mapping.len();
                self.observed.mapping_updates.lock().unwrap().push(mapping);
                SandboxResponse::UpdateAppInstallIdMapping(Outcome::Success(MappingAck { apps }))
            }
            SandboxRequest::AnalyzeObject(payload) => {
                self.observed.analyze_calls.fetch_add(1, Ordering::SeqCst);
                if payload.mime_type.starts_with("image/") {
                    SandboxResponse::AnalyzeObject(Outcome::Success(ContentMetadata {
                        object_id: payload.object_id,
                        mime_type: payload.mime_type,
                        size_bytes: 42,
                        sha256: "ab".repeat(32),
                        variants: vec!["metadata.json".into()],
                    }))
                } else {
                    SandboxResponse::AnalyzeObject(Outcome::failure(
                        codes::UNRECOGNIZED_MIME_TYPE,
                        "unsupported",
                    ))
                }
            }
            other => {
                use harbor_ipc::Action;
                other.failure_reply(harbor_ipc::ServiceError::new(
                    codes::INTERNAL_ERROR,
                    "not supported by fake",
                ))
            }
        }
    }
}

struct ChildControl {
    exit: Arc<Mutex<Option<oneshot::Sender<SandboxExit>>>>,
    _stderr: DuplexStream,
}

/// Launches [`FakeSandbox`]es wired over in-memory pipes.
pub struct FakeLauncher {
    modes: Mutex<Vec<InitMode>>,
    children: Mutex<Vec<ChildControl>>,
    fail_launch: AtomicBool,
    pub observed: Arc<Observed>,
}

impl FakeLauncher {
    /// `modes[n]` is used for the n-th launch; the last one repeats.
    pub fn new(modes: Vec<InitMode>) -> Arc<Self> {
        Arc::new(Self {
            modes: Mutex::new(modes),
            children: Mutex::new(Vec::new()),
            fail_launch: AtomicBool::new(false),
            observed: Arc::new(Observed::default()),
        })
    }

    pub fn fail_next_launch(&self) {
        self.fail_launch.store(true, Ordering::SeqCst);
    }

    /// Reports that child `index` exited with `code`.
    pub fn exit(&self, index: usize, code: Option<i32>) {
        let children = self.children.lock().unwrap();
        if let Some(tx) = children[index].exit.lock().unwrap().take() {
            let _ = tx.send(SandboxExit { code });
        }
    }

    pub fn launched(&self) -> usize {
        self.children.lock().unwrap().len()
    }
}

#[async_trait]
impl SandboxLauncher for FakeLauncher {
    async fn launch(&self) -> Result<LaunchedSandbox, HostError> {
        if self.fail_launch.swap(false, Ordering::SeqCst) {
            return Err(HostError::Spawn("no such program".into()));
        }

        let index = self.launched();
        let mode = {
            let modes = self.modes.lock().unwrap();
            modes
                .get(index)
                .or_else(|| modes.last())
                .copied()
                .unwrap_or(InitMode::Succeed)
        };

        let (host_out, sandbox_in) = tokio::io::duplex(64 * 1024);
        let (sandbox_out, host_in) = tokio::io::duplex(64 * 1024);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(1024);

        let sandbox = Connection::<SandboxSide>::new(sandbox_out);
        sandbox.serve(
            sandbox_in,
            Arc::new(FakeSandbox {
                id: index,
                mode,
                observed: Arc::clone(&self.observed),
            }),
            "stdin",
        );

        let (exit_tx, exit_rx) = oneshot::channel();
        let exit = Arc::new(Mutex::new(Some(exit_tx)));
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let on_kill = Arc::clone(&exit);
        tokio::spawn(async move {
            if kill_rx.await.is_ok() {
                if let Some(tx) = on_kill.lock().unwrap().take() {
                    let _ = tx.send(SandboxExit { code: None });
                }
            }
        });

        self.children.lock().unwrap().push(ChildControl {
            exit,
            _stderr: stderr_writer,
        });

        Ok(LaunchedSandbox {
            stdin: Box::new(host_out),
            stdout: Box::new(host_in),
            stderr: Box::new(stderr_reader),
            exited: exit_rx,
            kill: kill_tx,
        })
    }
}
