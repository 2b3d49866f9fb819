//! Test doubles for the sandbox's host and worker seams.

#![allow(dead_code)]

use async_trait::async_trait;
use harbor_ipc::{
    ContentUrls, IpcError, IpcResult, MetadataUrls, ServiceError, UiBundleDescriptor,
    WorkerExecConfig, WorkerHttpResponse, codes,
};
use harbor_sandbox::{HostApi, SandboxError, WorkerInvocation, WorkerRunner};
use harbor_types::{AppId, InstallId, WorkerId};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn app(id: &str) -> AppId {
    AppId::parse(id).unwrap()
}

pub fn install(id: &str) -> InstallId {
    InstallId::parse(id).unwrap()
}

pub fn exec_config(app_id: &str, worker_id: &str) -> WorkerExecConfig {
    WorkerExecConfig {
        app_id: app(app_id),
        worker_id: WorkerId::parse(worker_id).unwrap(),
        install_id: install("v1"),
        entrypoint: format!("workers/{worker_id}"),
        args: Vec::new(),
        env: BTreeMap::new(),
        working_dir: None,
        timeout_ms: None,
        db_token: None,
    }
}

/// Host double with per-key answers.
#[derive(Default)]
pub struct FakeHost {
    workers: Mutex<HashMap<String, WorkerExecConfig>>,
    bundles: Mutex<HashMap<String, Result<UiBundleDescriptor, ServiceError>>>,
    storage_base: Mutex<Option<String>>,
    pub config_lookups: AtomicUsize,
    pub bundle_lookups: AtomicUsize,
    pub metadata_requests: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeHost {
    pub fn with_worker(self, config: WorkerExecConfig) -> Self {
        let key = format!("{}/{}", config.app_id, config.worker_id);
        self.workers.lock().unwrap().insert(key, config);
        self
    }

    pub fn with_bundle(self, app_id: &str, answer: Result<UiBundleDescriptor, ServiceError>) -> Self {
        self.bundles
            .lock()
            .unwrap()
            .insert(app_id.to_string(), answer);
        self
    }

    pub fn with_storage(self, base: &str) -> Self {
        *self.storage_base.lock().unwrap() = Some(base.trim_end_matches('/').to_string());
        self
    }

    fn storage(&self) -> IpcResult<String> {
        self.storage_base.lock().unwrap().clone().ok_or_else(|| {
            IpcError::Remote(ServiceError::new(
                codes::STORAGE_ACCESS_FAILURE,
                "object storage is not configured",
            ))
        })
    }
}

#[async_trait]
impl HostApi for FakeHost {
    async fn worker_exec_config(
        &self,
        app: &AppId,
        worker: &WorkerId,
        _timeout: Duration,
    ) -> IpcResult<WorkerExecConfig> {
        self.config_lookups.fetch_add(1, Ordering::SeqCst);
        self.workers
            .lock()
            .unwrap()
            .get(&format!("{app}/{worker}"))
            .cloned()
            .ok_or_else(|| {
                IpcError::Remote(ServiceError::new(
                    codes::WORKER_NOT_FOUND,
                    format!("not found: worker '{worker}' of app '{app}'"),
                ))
            })
    }

    async fn ui_bundle(&self, app: &AppId) -> IpcResult<UiBundleDescriptor> {
        self.bundle_lookups.fetch_add(1, Ordering::SeqCst);
        match self.bundles.lock().unwrap().get(app.as_str()).cloned() {
            Some(answer) => answer.map_err(IpcError::Remote),
            None => Err(IpcError::Remote(ServiceError::new(
                codes::APP_NOT_FOUND,
                format!("not found: app '{app}'"),
            ))),
        }
    }

    async fn content_signed_urls(&self, object_id: &str) -> IpcResult<ContentUrls> {
        let base = self.storage()?;
        Ok(ContentUrls {
            object_id: object_id.to_string(),
            download_url: format!("{base}/objects/{object_id}"),
        })
    }

    async fn metadata_signed_urls(
        &self,
        object_id: &str,
        variants: Vec<String>,
    ) -> IpcResult<MetadataUrls> {
        let base = self.storage()?;
        self.metadata_requests
            .lock()
            .unwrap()
            .push((object_id.to_string(), variants.clone()));
        Ok(MetadataUrls {
            object_id: object_id.to_string(),
            upload_urls: variants
                .into_iter()
                .map(|v| {
                    let url = format!("{base}/objects/{object_id}/{v}");
                    (v, url)
                })
                .collect(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerMode {
    /// Echoes the request back; tasks return their name and input.
    Echo,
    Fail,
    /// Returns output that is not an HTTP response.
    Garbage,
}

/// Worker runner double that records every invocation.
pub struct FakeRunner {
    mode: RunnerMode,
    pub invocations: Mutex<Vec<(WorkerExecConfig, WorkerInvocation)>>,
}

impl FakeRunner {
    pub fn new(mode: RunnerMode) -> Self {
        Self {
            mode,
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkerRunner for FakeRunner {
    async fn invoke(
        &self,
        config: &WorkerExecConfig,
        invocation: &WorkerInvocation,
    ) -> Result<Value, SandboxError> {
        self.invocations
            .lock()
            .unwrap()
            .push((config.clone(), invocation.clone()));
        match self.mode {
            RunnerMode::Fail => Err(SandboxError::Worker("worker exited with exit status: 3".into())),
            RunnerMode::Garbage => Ok(json!("not a response")),
            RunnerMode::Echo => Ok(match invocation {
                WorkerInvocation::Http { request } | WorkerInvocation::System { request } => {
                    serde_json::to_value(WorkerHttpResponse {
                        status: 201,
                        headers: vec![
                            ("content-type".into(), "text/plain".into()),
                            ("x-worker-path".into(), request.path.clone()),
                        ],
                        body: request.body.clone(),
                    })
                    .unwrap()
                }
                WorkerInvocation::Task { task_name, input } => {
                    json!({ "task": task_name, "input": input })
                }
            }),
        }
    }
}
