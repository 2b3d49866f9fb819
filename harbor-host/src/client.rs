//! Typed host → sandbox calls.

use harbor_ipc::{
    ActionReply, AnalyzeObjectPayload, Connection, ContentMetadata, HostSide, InitPayload,
    InitResult, InstallMapping, IpcError, IpcResult, MappingAck, SandboxRequest, SandboxResponse,
    SystemRequestPayload, TaskPayload, TaskResult, WorkerHttpResponse,
};
use std::sync::Arc;
use std::time::Duration;

/// Handle to the control channel of one running sandbox.
#[derive(Clone)]
pub struct SandboxClient {
    conn: Arc<Connection<HostSide>>,
}

impl SandboxClient {
    pub fn new(conn: Arc<Connection<HostSide>>) -> Self {
        Self { conn }
    }

    pub async fn init(&self, payload: InitPayload) -> IpcResult<InitResult> {
        match self.conn.call(SandboxRequest::Init(payload)).await? {
            SandboxResponse::Init(outcome) => outcome.into_result(),
            other => Err(unexpected("init", &other)),
        }
    }

    pub async fn init_with_timeout(
        &self,
        payload: InitPayload,
        timeout: Duration,
    ) -> IpcResult<InitResult> {
        let request = SandboxRequest::Init(payload);
        match self.conn.call_with_timeout(request, timeout).await? {
            SandboxResponse::Init(outcome) => outcome.into_result(),
            other => Err(unexpected("init", &other)),
        }
    }

    pub async fn execute_task(&self, payload: TaskPayload) -> IpcResult<TaskResult> {
        match self.conn.call(SandboxRequest::ExecuteTask(payload)).await? {
            SandboxResponse::ExecuteTask(outcome) => outcome.into_result(),
            other => Err(unexpected("execute_task", &other)),
        }
    }

    pub async fn execute_system_request(
        &self,
        payload: SystemRequestPayload,
    ) -> IpcResult<WorkerHttpResponse> {
        match self
            .conn
            .call(SandboxRequest::ExecuteSystemRequest(payload))
            .await?
        {
            SandboxResponse::ExecuteSystemRequest(outcome) => outcome.into_result(),
            other => Err(unexpected("execute_system_request", &other)),
        }
    }

    pub async fn analyze_object(&self, payload: AnalyzeObjectPayload) -> IpcResult<ContentMetadata> {
        match self.conn.call(SandboxRequest::AnalyzeObject(payload)).await? {
            SandboxResponse::AnalyzeObject(outcome) => outcome.into_result(),
            other => Err(unexpected("analyze_object", &other)),
        }
    }

    pub async fn update_app_install_id_mapping(
        &self,
        mapping: InstallMapping,
    ) -> IpcResult<MappingAck> {
        match self
            .conn
            .call(SandboxRequest::UpdateAppInstallIdMapping(mapping))
            .await?
        {
            SandboxResponse::UpdateAppInstallIdMapping(outcome) => outcome.into_result(),
            other => Err(unexpected("update_app_install_id_mapping", &other)),
        }
    }

    /// Fails every in-flight call and refuses new ones.
    pub fn close(&self) {
        self.conn.close();
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }
}

fn unexpected(expected: &'static str, got: &SandboxResponse) -> IpcError {
    IpcError::UnexpectedResponse {
        expected,
        got: got.action_name(),
    }
}
