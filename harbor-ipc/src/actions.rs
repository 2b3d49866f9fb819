//! Action contract table for the control channel.
//!
//! Host → sandbox: `init`, `execute_task`, `execute_system_request`,
//! `analyze_object`, `update_app_install_id_mapping`.
//!
//! Sandbox → host: `get_worker_exec_config`, `get_ui_bundle`,
//! `get_content_signed_urls`, `get_metadata_signed_urls`.
//!
//! Request and response enums are adjacently tagged so the wire shape is
//! `{"action": "<name>", "payload": {...}}` for both.

use harbor_types::{AppId, InstallId, WorkerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::Side;
use crate::envelope::{Action, ActionReply, Outcome, ServiceError};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const UI_BUNDLE_TIMEOUT: Duration = Duration::from_secs(30);
const INIT_TIMEOUT: Duration = Duration::from_secs(30);
const MAPPING_TIMEOUT: Duration = Duration::from_secs(10);
const ANALYZE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const SYSTEM_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const TASK_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// App → active install id, replaced wholesale on every update.
pub type InstallMapping = BTreeMap<AppId, InstallId>;

// ── Host → sandbox payloads ─────────────────────────────────────

/// Limits the sandbox applies to worker executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    pub worker_timeout_ms: u64,
    pub config_timeout_ms: u64,
    pub max_body_bytes: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            worker_timeout_ms: 30_000,
            config_timeout_ms: 10_000,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    pub install_mapping: InstallMapping,
    #[serde(default)]
    pub options: ExecutionOptions,
    /// Public base URL of the host, forwarded to workers.
    pub base_url: String,
    /// Unix socket of the database proxy, when one is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_socket: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResult {
    /// Identifier of the sandbox process instance.
    pub worker_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub app_id: AppId,
    pub worker_id: WorkerId,
    pub task_name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(default)]
    pub output: Value,
}

/// An HTTP request forwarded to a worker. Bodies travel base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHttpRequest {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHttpResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemRequestPayload {
    pub app_id: AppId,
    pub worker_id: WorkerId,
    pub request: WorkerHttpRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeObjectPayload {
    pub object_id: String,
    pub mime_type: String,
}

/// Metadata produced by analysing a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    pub object_id: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Variants whose artifacts were uploaded.
    #[serde(default)]
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingAck {
    /// Number of apps in the mapping now in effect.
    pub apps: usize,
}

// ── Sandbox → host payloads ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfigQuery {
    pub app_id: AppId,
    pub worker_id: WorkerId,
}

/// Everything the sandbox needs to launch one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerExecConfig {
    pub app_id: AppId,
    pub worker_id: WorkerId,
    pub install_id: InstallId,
    /// Executable, relative paths resolve against `working_dir`.
    pub entrypoint: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Opens the database socket for `app_id`. Stamped by the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiBundleQuery {
    pub app_id: AppId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiBundleDescriptor {
    pub app_id: AppId,
    pub install_id: InstallId,
    pub download_url: String,
    /// Content-Security-Policy served with every bundle file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub object_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUrls {
    pub object_id: String,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUrlQuery {
    pub object_id: String,
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUrls {
    pub object_id: String,
    /// Variant name → signed upload URL.
    pub upload_urls: BTreeMap<String, String>,
}

// ── Contract enums ──────────────────────────────────────────────

/// Requests the host sends to the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum SandboxRequest {
    Init(InitPayload),
    ExecuteTask(TaskPayload),
    ExecuteSystemRequest(SystemRequestPayload),
    AnalyzeObject(AnalyzeObjectPayload),
    UpdateAppInstallIdMapping(InstallMapping),
}

/// Sandbox answers to [`SandboxRequest`], variant for variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum SandboxResponse {
    Init(Outcome<InitResult>),
    ExecuteTask(Outcome<TaskResult>),
    ExecuteSystemRequest(Outcome<WorkerHttpResponse>),
    AnalyzeObject(Outcome<ContentMetadata>),
    UpdateAppInstallIdMapping(Outcome<MappingAck>),
}

/// Requests the sandbox sends to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum HostRequest {
    GetWorkerExecConfig(WorkerConfigQuery),
    GetUiBundle(UiBundleQuery),
    GetContentSignedUrls(ObjectRef),
    GetMetadataSignedUrls(MetadataUrlQuery),
}

/// Host answers to [`HostRequest`], variant for variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum HostResponse {
    GetWorkerExecConfig(Outcome<WorkerExecConfig>),
    GetUiBundle(Outcome<UiBundleDescriptor>),
    GetContentSignedUrls(Outcome<ContentUrls>),
    GetMetadataSignedUrls(Outcome<MetadataUrls>),
}

impl Action for SandboxRequest {
    type Reply = SandboxResponse;

    fn action_name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::ExecuteTask(_) => "execute_task",
            Self::ExecuteSystemRequest(_) => "execute_system_request",
            Self::AnalyzeObject(_) => "analyze_object",
            Self::UpdateAppInstallIdMapping(_) => "update_app_install_id_mapping",
        }
    }

    fn default_timeout(&self) -> Duration {
        match self {
            Self::Init(_) => INIT_TIMEOUT,
            Self::ExecuteTask(_) => TASK_TIMEOUT,
            Self::ExecuteSystemRequest(_) => SYSTEM_REQUEST_TIMEOUT,
            Self::AnalyzeObject(_) => ANALYZE_TIMEOUT,
            Self::UpdateAppInstallIdMapping(_) => MAPPING_TIMEOUT,
        }
    }

    fn failure_reply(&self, error: ServiceError) -> SandboxResponse {
        match self {
            Self::Init(_) => SandboxResponse::Init(Outcome::Failure(error)),
            Self::ExecuteTask(_) => SandboxResponse::ExecuteTask(Outcome::Failure(error)),
            Self::ExecuteSystemRequest(_) => {
                SandboxResponse::ExecuteSystemRequest(Outcome::Failure(error))
            }
            Self::AnalyzeObject(_) => SandboxResponse::AnalyzeObject(Outcome::Failure(error)),
            Self::UpdateAppInstallIdMapping(_) => {
                SandboxResponse::UpdateAppInstallIdMapping(Outcome::Failure(error))
            }
        }
    }
}

impl ActionReply for SandboxResponse {
    fn action_name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::ExecuteTask(_) => "execute_task",
            Self::ExecuteSystemRequest(_) => "execute_system_request",
            Self::AnalyzeObject(_) => "analyze_object",
            Self::UpdateAppInstallIdMapping(_) => "update_app_install_id_mapping",
        }
    }
}

impl Action for HostRequest {
    type Reply = HostResponse;

    fn action_name(&self) -> &'static str {
        match self {
            Self::GetWorkerExecConfig(_) => "get_worker_exec_config",
            Self::GetUiBundle(_) => "get_ui_bundle",
            Self::GetContentSignedUrls(_) => "get_content_signed_urls",
            Self::GetMetadataSignedUrls(_) => "get_metadata_signed_urls",
        }
    }

    fn default_timeout(&self) -> Duration {
        match self {
            Self::GetUiBundle(_) => UI_BUNDLE_TIMEOUT,
            _ => LOOKUP_TIMEOUT,
        }
    }

    fn failure_reply(&self, error: ServiceError) -> HostResponse {
        match self {
            Self::GetWorkerExecConfig(_) => HostResponse::GetWorkerExecConfig(Outcome::Failure(error)),
            Self::GetUiBundle(_) => HostResponse::GetUiBundle(Outcome::Failure(error)),
            Self::GetContentSignedUrls(_) => {
                HostResponse::GetContentSignedUrls(Outcome::Failure(error))
            }
            Self::GetMetadataSignedUrls(_) => {
                HostResponse::GetMetadataSignedUrls(Outcome::Failure(error))
            }
        }
    }
}

impl ActionReply for HostResponse {
    fn action_name(&self) -> &'static str {
        match self {
            Self::GetWorkerExecConfig(_) => "get_worker_exec_config",
            Self::GetUiBundle(_) => "get_ui_bundle",
            Self::GetContentSignedUrls(_) => "get_content_signed_urls",
            Self::GetMetadataSignedUrls(_) => "get_metadata_signed_urls",
        }
    }
}

/// The host end: calls [`SandboxRequest`], serves [`HostRequest`].
#[derive(Debug)]
pub struct HostSide;

impl Side for HostSide {
    const PEER: &'static str = "sandbox";
    type Outbound = SandboxRequest;
    type Inbound = HostRequest;
}

/// The sandbox end: calls [`HostRequest`], serves [`SandboxRequest`].
#[derive(Debug)]
pub struct SandboxSide;

impl Side for SandboxSide {
    const PEER: &'static str = "host";
    type Outbound = HostRequest;
    type Inbound = SandboxRequest;
}

mod base64_body {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
