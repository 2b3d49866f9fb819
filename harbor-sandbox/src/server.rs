//! Serves host → sandbox requests.

use async_trait::async_trait;
use harbor_ipc::{
    InitResult, MappingAck, Outcome, RequestHandler, SandboxRequest, SandboxResponse,
    ServiceError, TaskResult, WorkerExecConfig, WorkerHttpResponse, codes,
};
use harbor_types::{AppId, WorkerId};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::analyzer::ContentAnalyzer;
use crate::error::SandboxError;
use crate::host_api::HostApi;
use crate::runner::{WorkerInvocation, WorkerRunner};
use crate::state::SandboxState;

pub struct SandboxHandler {
    state: Arc<SandboxState>,
    host: Arc<dyn HostApi>,
    runner: Arc<dyn WorkerRunner>,
    analyzer: Arc<ContentAnalyzer>,
}

impl SandboxHandler {
    pub fn new(
        state: Arc<SandboxState>,
        host: Arc<dyn HostApi>,
        runner: Arc<dyn WorkerRunner>,
        analyzer: Arc<ContentAnalyzer>,
    ) -> Self {
        Self {
            state,
            host,
            runner,
            analyzer,
        }
    }

    async fn exec_config(
        &self,
        app: &AppId,
        worker: &WorkerId,
    ) -> Result<WorkerExecConfig, SandboxError> {
        let options = self.state.options().ok_or(SandboxError::NotInitialized)?;
        let timeout = Duration::from_millis(options.config_timeout_ms);
        Ok(self.host.worker_exec_config(app, worker, timeout).await?)
    }

    async fn run(
        &self,
        app: &AppId,
        worker: &WorkerId,
        invocation: WorkerInvocation,
    ) -> Result<Value, SandboxError> {
        let config = self.exec_config(app, worker).await?;
        self.runner.invoke(&config, &invocation).await
    }
}

fn outcome<T>(action: &'static str, result: Result<T, SandboxError>) -> Outcome<T> {
    match result {
        Ok(value) => Outcome::Success(value),
        Err(e) => {
            let error = ServiceError::from(e);
            warn!(action, code = %error.code, message = %error.message, "request failed");
            Outcome::Failure(error)
        }
    }
}

#[async_trait]
impl RequestHandler<SandboxRequest> for SandboxHandler {
    async fn handle(&self, request: SandboxRequest) -> SandboxResponse {
        match request {
            SandboxRequest::Init(payload) => {
                self.state.initialize(payload);
                SandboxResponse::Init(Outcome::Success(InitResult {
                    worker_id: self.state.worker_id().to_string(),
                }))
            }
            SandboxRequest::UpdateAppInstallIdMapping(mapping) => {
                match self.state.replace_mapping(mapping) {
                    Some(apps) => {
                        SandboxResponse::UpdateAppInstallIdMapping(Outcome::Success(MappingAck {
                            apps,
                        }))
                    }
                    None => SandboxResponse::UpdateAppInstallIdMapping(Outcome::failure(
                        codes::NOT_INITIALIZED,
                        "sandbox has not been initialized",
                    )),
                }
            }
            SandboxRequest::ExecuteTask(payload) => {
                let invocation = WorkerInvocation::Task {
                    task_name: payload.task_name,
                    input: payload.input,
                };
                let result = self
                    .run(&payload.app_id, &payload.worker_id, invocation)
                    .await
                    .map(|output| TaskResult { output });
                SandboxResponse::ExecuteTask(outcome("execute_task", result))
            }
            SandboxRequest::ExecuteSystemRequest(payload) => {
                let invocation = WorkerInvocation::System {
                    request: payload.request,
                };
                let result = match self
                    .run(&payload.app_id, &payload.worker_id, invocation)
                    .await
                {
                    Ok(output) => serde_json::from_value::<WorkerHttpResponse>(output).map_err(
                        |e| SandboxError::Worker(format!("invalid worker response: {e}")),
                    ),
                    Err(e) => Err(e),
                };
                SandboxResponse::ExecuteSystemRequest(outcome("execute_system_request", result))
            }
            SandboxRequest::AnalyzeObject(payload) => SandboxResponse::AnalyzeObject(outcome(
                "analyze_object",
                self.analyzer.analyze(payload).await,
            )),
        }
    }
}
