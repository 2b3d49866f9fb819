//! Host-side services the sandbox may call.
//!
//! [`HostServices`] is the seam between the control channel and whatever
//! backs the host (a registry, object storage, a metadata store). The
//! dispatcher translates its [`ServiceFailure`]s into stable wire codes.

use async_trait::async_trait;
use harbor_ipc::{
    ContentMetadata, ContentUrls, InstallMapping, MetadataUrls, UiBundleDescriptor,
    WorkerExecConfig,
};
use harbor_types::{AppId, WorkerId};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{AppEntry, HostConfig, StorageConfig};

/// Why a host service could not answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceFailure {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait HostServices: Send + Sync + 'static {
    async fn worker_exec_config(
        &self,
        app: &AppId,
        worker: &WorkerId,
    ) -> Result<WorkerExecConfig, ServiceFailure>;

    async fn ui_bundle(&self, app: &AppId) -> Result<UiBundleDescriptor, ServiceFailure>;

    async fn content_signed_urls(&self, object_id: &str) -> Result<ContentUrls, ServiceFailure>;

    async fn metadata_signed_urls(
        &self,
        object_id: &str,
        variants: &[String],
    ) -> Result<MetadataUrls, ServiceFailure>;

    async fn persist_content_metadata(
        &self,
        metadata: &ContentMetadata,
    ) -> Result<(), ServiceFailure>;

    /// Active install id of every enabled app.
    async fn install_mapping(&self) -> Result<InstallMapping, ServiceFailure>;
}

/// Config-driven services: an in-memory app registry plus URL signing
/// against a shared secret.
pub struct StaticHostServices {
    apps: RwLock<BTreeMap<AppId, AppEntry>>,
    storage: StorageConfig,
    metadata: RwLock<HashMap<String, ContentMetadata>>,
}

impl StaticHostServices {
    pub fn new(apps: Vec<AppEntry>, storage: StorageConfig) -> Self {
        Self {
            apps: RwLock::new(
                apps.into_iter()
                    .map(|entry| (entry.app_id.clone(), entry))
                    .collect(),
            ),
            storage,
            metadata: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(config.apps.clone(), config.storage.clone())
    }

    /// Registers or replaces an app. Push the new mapping to the sandbox
    /// afterwards with `Supervisor::refresh_install_mapping`.
    pub fn upsert_app(&self, entry: AppEntry) {
        info!(app = %entry.app_id, install = %entry.install_id, "app registered");
        self.apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.app_id.clone(), entry);
    }

    pub fn remove_app(&self, app: &AppId) -> bool {
        self.apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app)
            .is_some()
    }

    /// Metadata persisted for `object_id`, if any.
    pub fn content_metadata(&self, object_id: &str) -> Option<ContentMetadata> {
        self.metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(object_id)
            .cloned()
    }

    /// Hex SHA-256 over `secret:method:path:expires`.
    pub fn sign(&self, method: &str, path: &str, expires: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.storage.signing_secret.as_bytes());
        hasher.update(b":");
        hasher.update(method.as_bytes());
        hasher.update(b":");
        hasher.update(path.as_bytes());
        hasher.update(b":");
        hasher.update(expires.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn apps(&self) -> RwLockReadGuard<'_, BTreeMap<AppId, AppEntry>> {
        self.apps.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn enabled_app(&self, app: &AppId) -> Result<AppEntry, ServiceFailure> {
        let entry = self
            .apps()
            .get(app)
            .cloned()
            .ok_or_else(|| ServiceFailure::NotFound(format!("app '{app}'")))?;
        if !entry.enabled {
            return Err(ServiceFailure::Unavailable(format!("app '{app}' is disabled")));
        }
        Ok(entry)
    }

    fn signed_url(&self, method: &str, path: &str) -> Result<String, ServiceFailure> {
        let base = self
            .storage
            .base_url
            .as_deref()
            .ok_or_else(|| ServiceFailure::Unavailable("object storage is not configured".into()))?;
        let expires = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .saturating_add(Duration::from_secs(self.storage.url_ttl_secs))
            .as_secs();
        let signature = self.sign(method, path, expires);
        Ok(format!(
            "{}{path}?expires={expires}&signature={signature}",
            base.trim_end_matches('/')
        ))
    }
}

fn check_object_id(object_id: &str) -> Result<(), ServiceFailure> {
    let valid = !object_id.is_empty()
        && object_id.len() <= 128
        && object_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !object_id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ServiceFailure::NotFound(format!("object '{object_id}'")))
    }
}

#[async_trait]
impl HostServices for StaticHostServices {
    async fn worker_exec_config(
        &self,
        app: &AppId,
        worker: &WorkerId,
    ) -> Result<WorkerExecConfig, ServiceFailure> {
        let entry = self.enabled_app(app)?;
        let found = entry
            .workers
            .iter()
            .find(|w| &w.worker_id == worker)
            .ok_or_else(|| ServiceFailure::NotFound(format!("worker '{worker}' of app '{app}'")))?;
        if !found.enabled {
            return Err(ServiceFailure::Unavailable(format!(
                "worker '{worker}' of app '{app}' is disabled"
            )));
        }
        Ok(WorkerExecConfig {
            app_id: entry.app_id.clone(),
            worker_id: found.worker_id.clone(),
            install_id: entry.install_id.clone(),
            entrypoint: found.entrypoint.clone(),
            args: found.args.clone(),
            env: found.env.clone(),
            working_dir: found.working_dir.clone(),
            timeout_ms: found.timeout_ms,
            db_token: None,
        })
    }

    async fn ui_bundle(&self, app: &AppId) -> Result<UiBundleDescriptor, ServiceFailure> {
        let entry = self.enabled_app(app)?;
        let download_url = entry
            .ui_bundle_url
            .clone()
            .ok_or_else(|| ServiceFailure::NotFound(format!("app '{app}' has no UI bundle")))?;
        Ok(UiBundleDescriptor {
            app_id: entry.app_id,
            install_id: entry.install_id,
            download_url,
            csp: entry.csp,
        })
    }

    async fn content_signed_urls(&self, object_id: &str) -> Result<ContentUrls, ServiceFailure> {
        check_object_id(object_id)?;
        Ok(ContentUrls {
            object_id: object_id.to_string(),
            download_url: self.signed_url("GET", &format!("/objects/{object_id}"))?,
        })
    }

    async fn metadata_signed_urls(
        &self,
        object_id: &str,
        variants: &[String],
    ) -> Result<MetadataUrls, ServiceFailure> {
        check_object_id(object_id)?;
        let mut upload_urls = BTreeMap::new();
        for variant in variants {
            check_object_id(variant)?;
            let path = format!("/objects/{object_id}/{variant}");
            upload_urls.insert(variant.clone(), self.signed_url("PUT", &path)?);
        }
        Ok(MetadataUrls {
            object_id: object_id.to_string(),
            upload_urls,
        })
    }

    async fn persist_content_metadata(
        &self,
        metadata: &ContentMetadata,
    ) -> Result<(), ServiceFailure> {
        debug!(object = %metadata.object_id, "persisting content metadata");
        self.metadata
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(metadata.object_id.clone(), metadata.clone());
        Ok(())
    }

    async fn install_mapping(&self) -> Result<InstallMapping, ServiceFailure> {
        Ok(self
            .apps()
            .values()
            .filter(|entry| entry.enabled)
            .map(|entry| (entry.app_id.clone(), entry.install_id.clone()))
            .collect())
    }
}
