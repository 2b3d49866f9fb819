//! Content analysis for stored objects.
//!
//! Derives size and digest metadata and uploads it next to the object.
//! Only image and video objects are analysed.

use harbor_ipc::{AnalyzeObjectPayload, ContentMetadata};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::SandboxError;
use crate::host_api::HostApi;

/// Variant name of the uploaded metadata document.
pub const METADATA_VARIANT: &str = "metadata.json";

pub struct ContentAnalyzer {
    host: Arc<dyn HostApi>,
    http: reqwest::Client,
}

impl ContentAnalyzer {
    pub fn new(host: Arc<dyn HostApi>, http: reqwest::Client) -> Self {
        Self { host, http }
    }

    pub fn supports(mime_type: &str) -> bool {
        let mime = mime_type.trim().to_ascii_lowercase();
        mime.starts_with("image/") || mime.starts_with("video/")
    }

    pub async fn analyze(
        &self,
        request: AnalyzeObjectPayload,
    ) -> Result<ContentMetadata, SandboxError> {
        if !Self::supports(&request.mime_type) {
            return Err(SandboxError::UnsupportedMime(request.mime_type));
        }

        let urls = self.host.content_signed_urls(&request.object_id).await?;
        let content = self.download(&urls.download_url).await?;
        debug!(object = %request.object_id, bytes = content.len(), "object downloaded");

        let metadata = ContentMetadata {
            object_id: request.object_id.clone(),
            mime_type: request.mime_type,
            size_bytes: content.len() as u64,
            sha256: hex::encode(Sha256::digest(&content)),
            variants: vec![METADATA_VARIANT.to_string()],
        };

        let targets = self
            .host
            .metadata_signed_urls(&request.object_id, vec![METADATA_VARIANT.to_string()])
            .await?;
        let upload_url = targets.upload_urls.get(METADATA_VARIANT).ok_or_else(|| {
            SandboxError::Storage(format!("no upload URL for {METADATA_VARIANT}"))
        })?;
        self.upload(upload_url, serde_json::to_vec(&metadata)?).await?;

        info!(object = %metadata.object_id, size = metadata.size_bytes, "object analysed");
        Ok(metadata)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, SandboxError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SandboxError::Storage(format!("download failed: {e}")))?;
        if !response.status().is_success() {
            return Err(SandboxError::Storage(format!(
                "download failed: HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SandboxError::Storage(format!("read download body failed: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn upload(&self, url: &str, body: Vec<u8>) -> Result<(), SandboxError> {
        let response = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SandboxError::Storage(format!("upload failed: {e}")))?;
        if !response.status().is_success() {
            return Err(SandboxError::Storage(format!(
                "upload failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}
