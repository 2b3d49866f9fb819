//! Host configuration, loaded from TOML.
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration for local development.

use harbor_ipc::ExecutionOptions;
use harbor_types::{AppId, InstallId, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::HostError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Public base URL forwarded to the sandbox at init.
    pub base_url: String,
    pub sandbox: SandboxConfig,
    pub supervisor: SupervisorConfig,
    pub execution: ExecutionConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub apps: Vec<AppEntry>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            sandbox: SandboxConfig::default(),
            supervisor: SupervisorConfig::default(),
            execution: ExecutionConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            apps: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Loads configuration from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, HostError> {
        if !path.exists() {
            info!("No config file found at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)
            .map_err(|e| HostError::Config(format!("{}: {e}", path.display())))?;
        info!("Loaded host config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, HostError> {
        toml::from_str(contents).map_err(|e| HostError::Config(e.to_string()))
    }
}

/// How to launch the sandbox process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Unprivileged user to run as (Unix only).
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// The only environment the sandbox sees.
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("harbor-sandbox"),
            args: Vec::new(),
            uid: None,
            gid: None,
            env: BTreeMap::new(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub restart_backoff_ms: u64,
    pub init_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_backoff_ms: 5_000,
            init_timeout_ms: 30_000,
        }
    }
}

impl SupervisorConfig {
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

/// Limits pushed to the sandbox at init.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub worker_timeout_ms: u64,
    pub config_timeout_ms: u64,
    pub max_body_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let defaults = ExecutionOptions::default();
        Self {
            worker_timeout_ms: defaults.worker_timeout_ms,
            config_timeout_ms: defaults.config_timeout_ms,
            max_body_bytes: defaults.max_body_bytes,
        }
    }
}

impl From<&ExecutionConfig> for ExecutionOptions {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            worker_timeout_ms: config.worker_timeout_ms,
            config_timeout_ms: config.config_timeout_ms,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub data_dir: PathBuf,
    /// Unix socket for the database proxy; no proxy listener when unset.
    pub socket_path: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("harbor-data"),
            socket_path: None,
        }
    }
}

/// Object storage used for signed content URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base URL of the object store; signed URLs are unavailable when unset.
    pub base_url: Option<String>,
    pub signing_secret: String,
    pub url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            signing_secret: String::new(),
            url_ttl_secs: 900,
        }
    }
}

fn enabled() -> bool {
    true
}

/// A registered application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    pub app_id: AppId,
    pub install_id: InstallId,
    /// Disabled apps stay registered but answer as unavailable.
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub ui_bundle_url: Option<String>,
    #[serde(default)]
    pub csp: Option<String>,
    #[serde(default)]
    pub workers: Vec<WorkerEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEntry {
    pub worker_id: WorkerId,
    pub entrypoint: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "enabled")]
    pub enabled: bool,
}
