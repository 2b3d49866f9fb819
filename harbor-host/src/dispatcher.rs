//! Serves sandbox → host requests.

use async_trait::async_trait;
use harbor_db::DbAccessKeys;
use harbor_ipc::{
    AnalyzeObjectPayload, ContentMetadata, HostRequest, HostResponse, Outcome, RequestHandler,
    ServiceError, codes,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::SandboxClient;
use crate::error::HostError;
use crate::services::{HostServices, ServiceFailure};

/// Which failure-code row of the translation table applies.
#[derive(Debug, Clone, Copy)]
enum Lookup {
    Worker,
    App,
    Storage,
}

impl Lookup {
    fn translate(self, failure: ServiceFailure) -> ServiceError {
        let code = match (self, &failure) {
            (Self::Worker, ServiceFailure::NotFound(_)) => codes::WORKER_NOT_FOUND,
            (Self::Worker, ServiceFailure::Unavailable(_)) => codes::WORKER_UNAVAILABLE,
            (Self::App, ServiceFailure::NotFound(_)) => codes::APP_NOT_FOUND,
            (Self::App, ServiceFailure::Unavailable(_)) => codes::APP_UNAVAILABLE,
            (Self::Storage, ServiceFailure::NotFound(_)) => codes::OBJECT_NOT_FOUND,
            (Self::Storage, _) => codes::STORAGE_ACCESS_FAILURE,
            (_, ServiceFailure::Other(_)) => codes::INTERNAL_ERROR,
        };
        ServiceError::new(code, failure.to_string())
    }
}

fn outcome<T>(lookup: Lookup, action: &'static str, result: Result<T, ServiceFailure>) -> Outcome<T> {
    match result {
        Ok(value) => Outcome::Success(value),
        Err(failure) => {
            let error = lookup.translate(failure);
            warn!(action, code = %error.code, message = %error.message, "host request failed");
            Outcome::Failure(error)
        }
    }
}

pub struct HostDispatcher {
    services: Arc<dyn HostServices>,
    db_access: Option<Arc<DbAccessKeys>>,
}

impl HostDispatcher {
    pub fn new(services: Arc<dyn HostServices>) -> Self {
        Self {
            services,
            db_access: None,
        }
    }

    /// Stamps every worker config with a database token for its app.
    pub fn with_db_access(mut self, keys: Arc<DbAccessKeys>) -> Self {
        self.db_access = Some(keys);
        self
    }

    pub fn services(&self) -> &Arc<dyn HostServices> {
        &self.services
    }

    /// Asks the sandbox to analyse an object and persists the result.
    /// Nothing is persisted when the sandbox reports a failure.
    pub async fn analyze_object(
        &self,
        client: &SandboxClient,
        request: AnalyzeObjectPayload,
    ) -> Result<ContentMetadata, HostError> {
        let metadata = client.analyze_object(request).await?;
        self.services.persist_content_metadata(&metadata).await?;
        info!(
            object = %metadata.object_id,
            size = metadata.size_bytes,
            "content metadata stored"
        );
        Ok(metadata)
    }
}

#[async_trait]
impl RequestHandler<HostRequest> for HostDispatcher {
    async fn handle(&self, request: HostRequest) -> HostResponse {
        match request {
            HostRequest::GetWorkerExecConfig(query) => {
                let result = self
                    .services
                    .worker_exec_config(&query.app_id, &query.worker_id)
                    .await
                    .map(|mut config| {
                        if let Some(keys) = &self.db_access {
                            config.db_token = Some(keys.token_for(&config.app_id));
                        }
                        config
                    });
                HostResponse::GetWorkerExecConfig(outcome(
                    Lookup::Worker,
                    "get_worker_exec_config",
                    result,
                ))
            }
            HostRequest::GetUiBundle(query) => HostResponse::GetUiBundle(outcome(
                Lookup::App,
                "get_ui_bundle",
                self.services.ui_bundle(&query.app_id).await,
            )),
            HostRequest::GetContentSignedUrls(object) => {
                HostResponse::GetContentSignedUrls(outcome(
                    Lookup::Storage,
                    "get_content_signed_urls",
                    self.services.content_signed_urls(&object.object_id).await,
                ))
            }
            HostRequest::GetMetadataSignedUrls(query) => {
                HostResponse::GetMetadataSignedUrls(outcome(
                    Lookup::Storage,
                    "get_metadata_signed_urls",
                    self.services
                        .metadata_signed_urls(&query.object_id, &query.variants)
                        .await,
                ))
            }
        }
    }
}
