//! Sandbox → host calls.

use async_trait::async_trait;
use harbor_ipc::{
    ActionReply, Connection, ContentUrls, HostRequest, HostResponse, IpcError, IpcResult,
    MetadataUrlQuery, MetadataUrls, ObjectRef, SandboxSide, UiBundleDescriptor, UiBundleQuery,
    WorkerConfigQuery, WorkerExecConfig,
};
use harbor_types::{AppId, WorkerId};
use std::sync::Arc;
use std::time::Duration;

/// What the sandbox may ask of the host.
#[async_trait]
pub trait HostApi: Send + Sync + 'static {
    async fn worker_exec_config(
        &self,
        app: &AppId,
        worker: &WorkerId,
        timeout: Duration,
    ) -> IpcResult<WorkerExecConfig>;

    async fn ui_bundle(&self, app: &AppId) -> IpcResult<UiBundleDescriptor>;

    async fn content_signed_urls(&self, object_id: &str) -> IpcResult<ContentUrls>;

    async fn metadata_signed_urls(
        &self,
        object_id: &str,
        variants: Vec<String>,
    ) -> IpcResult<MetadataUrls>;
}

/// [`HostApi`] over the control channel.
#[derive(Clone)]
pub struct IpcHostClient {
    conn: Arc<Connection<SandboxSide>>,
}

impl IpcHostClient {
    pub fn new(conn: Arc<Connection<SandboxSide>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl HostApi for IpcHostClient {
    async fn worker_exec_config(
        &self,
        app: &AppId,
        worker: &WorkerId,
        timeout: Duration,
    ) -> IpcResult<WorkerExecConfig> {
        let request = HostRequest::GetWorkerExecConfig(WorkerConfigQuery {
            app_id: app.clone(),
            worker_id: worker.clone(),
        });
        match self.conn.call_with_timeout(request, timeout).await? {
            HostResponse::GetWorkerExecConfig(outcome) => outcome.into_result(),
            other => Err(unexpected("get_worker_exec_config", &other)),
        }
    }

    async fn ui_bundle(&self, app: &AppId) -> IpcResult<UiBundleDescriptor> {
        let request = HostRequest::GetUiBundle(UiBundleQuery {
            app_id: app.clone(),
        });
        match self.conn.call(request).await? {
            HostResponse::GetUiBundle(outcome) => outcome.into_result(),
            other => Err(unexpected("get_ui_bundle", &other)),
        }
    }

    async fn content_signed_urls(&self, object_id: &str) -> IpcResult<ContentUrls> {
        let request = HostRequest::GetContentSignedUrls(ObjectRef {
            object_id: object_id.to_string(),
        });
        match self.conn.call(request).await? {
            HostResponse::GetContentSignedUrls(outcome) => outcome.into_result(),
            other => Err(unexpected("get_content_signed_urls", &other)),
        }
    }

    async fn metadata_signed_urls(
        &self,
        object_id: &str,
        variants: Vec<String>,
    ) -> IpcResult<MetadataUrls> {
        let request = HostRequest::GetMetadataSignedUrls(MetadataUrlQuery {
            object_id: object_id.to_string(),
            variants,
        });
        match self.conn.call(request).await? {
            HostResponse::GetMetadataSignedUrls(outcome) => outcome.into_result(),
            other => Err(unexpected("get_metadata_signed_urls", &other)),
        }
    }
}

fn unexpected(expected: &'static str, got: &HostResponse) -> IpcError {
    IpcError::UnexpectedResponse {
        expected,
        got: got.action_name(),
    }
}
