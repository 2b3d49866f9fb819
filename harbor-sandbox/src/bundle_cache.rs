//! On-disk cache of unpacked UI bundles.
//!
//! Layout: `{root}/{app}/{install}/` holds the bundle's files plus
//! `.harbor/manifest.json`. A bundle is unpacked into a staging directory
//! next to its final place and renamed in. Install ids are immutable, so
//! when two writers race the loser's copy is simply discarded.

use harbor_bundle::{BundleManifest, UiBundle, safe_join};
use harbor_ipc::UiBundleDescriptor;
use harbor_types::{AppId, InstallId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::GatewayError;

const RECORD_DIR: &str = ".harbor";
const RECORD_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheRecord {
    manifest: BundleManifest,
    content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    csp: Option<String>,
}

/// A bundle present in the cache.
#[derive(Debug, Clone)]
pub struct CachedBundle {
    dir: PathBuf,
    record: CacheRecord,
}

/// A file resolved from a bundle, ready to send.
#[derive(Debug, Clone)]
pub struct BundleFile {
    pub body: Vec<u8>,
    pub content_type: String,
    pub csp: Option<String>,
    pub etag: String,
}

impl CachedBundle {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn content_hash(&self) -> &str {
        &self.record.content_hash
    }

    pub fn csp(&self) -> Option<&str> {
        self.record.csp.as_deref()
    }

    /// Resolves a request path. Unknown paths fall back to the index
    /// document; paths that would leave the bundle are rejected.
    pub async fn read_file(&self, request_path: &str) -> Result<BundleFile, GatewayError> {
        let relative = request_path.trim_start_matches('/');
        let hidden = relative
            .split('/')
            .find(|segment| !segment.is_empty() && *segment != ".")
            == Some(RECORD_DIR);

        if !relative.is_empty() && !hidden {
            let path = safe_join(&self.dir, relative).ok_or(GatewayError::FileNotFound)?;
            if is_file(&path).await {
                return self.load(&path, relative).await;
            }
        }

        let index = self.record.manifest.index.clone();
        match safe_join(&self.dir, &index) {
            Some(path) if is_file(&path).await => self.load(&path, &index).await,
            _ => Err(GatewayError::FileNotFound),
        }
    }

    async fn load(&self, path: &Path, relative: &str) -> Result<BundleFile, GatewayError> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| GatewayError::Internal(format!("failed to read {relative}: {e}")))?;
        Ok(BundleFile {
            body,
            content_type: self.record.manifest.content_type_for(relative).to_string(),
            csp: self.record.csp.clone(),
            etag: format!("\"{}\"", self.record.content_hash),
        })
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

pub struct BundleCache {
    root: PathBuf,
    http: reqwest::Client,
}

impl BundleCache {
    pub fn new(root: impl Into<PathBuf>, http: reqwest::Client) -> Self {
        Self {
            root: root.into(),
            http,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundle_dir(&self, app: &AppId, install: &InstallId) -> PathBuf {
        self.root.join(app.as_str()).join(install.as_str())
    }

    /// The cached copy of `(app, install)`, if complete.
    pub async fn cached(&self, app: &AppId, install: &InstallId) -> Option<CachedBundle> {
        let dir = self.bundle_dir(app, install);
        let raw = tokio::fs::read(dir.join(RECORD_DIR).join(RECORD_FILE))
            .await
            .ok()?;
        match serde_json::from_slice::<CacheRecord>(&raw) {
            Ok(record) => Some(CachedBundle { dir, record }),
            Err(e) => {
                warn!(app = %app, install = %install, error = %e, "ignoring corrupt cache record");
                None
            }
        }
    }

    /// The bundle `descriptor` points at, downloading and unpacking it
    /// only when that install is not cached yet.
    pub async fn fetch(&self, descriptor: &UiBundleDescriptor) -> Result<CachedBundle, GatewayError> {
        if let Some(bundle) = self.cached(&descriptor.app_id, &descriptor.install_id).await {
            debug!(
                app = %descriptor.app_id,
                install = %descriptor.install_id,
                "bundle already cached"
            );
            return Ok(bundle);
        }
        let bytes = self.download(&descriptor.download_url).await?;
        debug!(app = %descriptor.app_id, bytes = bytes.len(), "bundle downloaded");

        let dir = self.bundle_dir(&descriptor.app_id, &descriptor.install_id);
        let csp = descriptor.csp.clone();
        tokio::task::spawn_blocking(move || install_bundle(&dir, &bytes, csp))
            .await
            .map_err(|e| GatewayError::Internal(format!("bundle unpack task failed: {e}")))?
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, GatewayError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::BundleFetch(format!("download failed: {e}")))?;
        if !response.status().is_success() {
            return Err(GatewayError::BundleFetch(format!(
                "download failed: HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::BundleFetch(format!("read download body failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

fn install_bundle(
    dir: &Path,
    bytes: &[u8],
    csp: Option<String>,
) -> Result<CachedBundle, GatewayError> {
    let unextractable = |e: &dyn std::fmt::Display| {
        GatewayError::BundleFetch(format!("unextractable bundle: {e}"))
    };
    let bundle = UiBundle::from_bytes(bytes).map_err(|e| unextractable(&e))?;
    if bundle.files.keys().any(|name| name.split('/').next() == Some(RECORD_DIR)) {
        return Err(unextractable(&"bundle contains a reserved .harbor entry"));
    }

    let record = CacheRecord {
        content_hash: bundle.content_hash(),
        csp: csp.or_else(|| bundle.manifest.csp.clone()),
        manifest: bundle.manifest.clone(),
    };

    let internal = |e: std::io::Error| GatewayError::Internal(format!("bundle cache: {e}"));
    let parent = dir
        .parent()
        .ok_or_else(|| GatewayError::Internal("bundle cache has no parent directory".into()))?;
    std::fs::create_dir_all(parent).map_err(internal)?;

    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(parent)
        .map_err(internal)?;
    bundle
        .unpack_to(staging.path())
        .map_err(|e| unextractable(&e))?;
    let record_dir = staging.path().join(RECORD_DIR);
    std::fs::create_dir_all(&record_dir).map_err(internal)?;
    let encoded = serde_json::to_vec_pretty(&record)
        .map_err(|e| GatewayError::Internal(format!("bundle cache record: {e}")))?;
    std::fs::write(record_dir.join(RECORD_FILE), encoded).map_err(internal)?;

    let staged = staging.keep();
    if let Err(e) = std::fs::rename(&staged, dir) {
        let _ = std::fs::remove_dir_all(&staged);
        if !dir.join(RECORD_DIR).join(RECORD_FILE).is_file() {
            return Err(internal(e));
        }
        debug!(dir = %dir.display(), "bundle already cached by a concurrent request");
    } else {
        info!(dir = %dir.display(), hash = %record.content_hash, "bundle cached");
    }

    Ok(CachedBundle {
        dir: dir.to_path_buf(),
        record,
    })
}
