//! HTTP gateway inside the sandbox.
//!
//! ```text
//!  GET /health                         liveness
//!  ANY /worker-api/{worker}/{*rest}    worker invocation for the Host's tenant
//!  *                                   tenant's UI bundle (SPA fallback)
//! ```
//!
//! The tenant is the first label of a `{tenant}.apps.{domain}` Host header.

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::Router;
use futures::StreamExt;
use harbor_ipc::{WorkerHttpRequest, WorkerHttpResponse, codes};
use harbor_types::{AppId, WorkerId};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::bundle_cache::{BundleCache, BundleFile};
use crate::error::GatewayError;
use crate::host_api::HostApi;
use crate::runner::{WorkerInvocation, WorkerRunner};
use crate::state::SandboxState;

/// Shared state of every gateway handler.
pub struct GatewayState {
    pub sandbox: Arc<SandboxState>,
    pub host: Arc<dyn HostApi>,
    pub runner: Arc<dyn WorkerRunner>,
    pub bundles: BundleCache,
}

/// Build the gateway router.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/worker-api/{worker_id}", any(invoke_worker))
        .route("/worker-api/{worker_id}/{*rest}", any(invoke_worker))
        .fallback(serve_bundle)
        // Limits come from the init options instead.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

async fn health(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    Json(json!({
        "status": "ok",
        "timestamp": timestamp,
        "workerId": state.sandbox.worker_id(),
    }))
}

/// Tenant named by a `{tenant}.apps.{domain}` Host header.
pub fn tenant_from_headers(headers: &HeaderMap) -> Result<AppId, GatewayError> {
    let host = headers
        .get(header::HOST)
        .ok_or(GatewayError::MissingHost)?
        .to_str()
        .map_err(|_| GatewayError::MissingHost)?;
    let name = host.rsplit_once(':').map_or(host, |(name, port)| {
        if port.chars().all(|c| c.is_ascii_digit()) {
            name
        } else {
            host
        }
    });
    let unknown = || GatewayError::UnknownHost(host.to_string());

    let (tenant, rest) = name.split_once('.').ok_or_else(unknown)?;
    match rest.strip_prefix("apps.") {
        Some(domain) if !domain.is_empty() => AppId::parse(tenant).map_err(|_| unknown()),
        _ => Err(unknown()),
    }
}

#[derive(Debug, Deserialize)]
struct WorkerPath {
    worker_id: String,
    #[serde(default)]
    rest: Option<String>,
}

async fn invoke_worker(
    State(state): State<Arc<GatewayState>>,
    Path(path): Path<WorkerPath>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, GatewayError> {
    let app = tenant_from_headers(&headers)?;
    let worker = WorkerId::parse(&path.worker_id)
        .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
    let options = state.sandbox.options().ok_or(GatewayError::NotInitialized)?;
    let body = read_body(&headers, body, options.max_body_bytes).await?;

    let timeout = Duration::from_millis(options.config_timeout_ms);
    let config = state
        .host
        .worker_exec_config(&app, &worker, timeout)
        .await
        .map_err(|e| {
            warn!(app = %app, worker = %worker, error = %e, "worker config lookup failed");
            GatewayError::ConfigLookup(e.into_service_error())
        })?;

    let request = WorkerHttpRequest {
        method: method.to_string(),
        path: format!("/{}", path.rest.unwrap_or_default()),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body,
    };
    debug!(app = %app, worker = %worker, path = %request.path, "invoking worker");

    let output = state
        .runner
        .invoke(&config, &WorkerInvocation::Http { request })
        .await
        .map_err(|e| GatewayError::WorkerFailed(e.to_string()))?;
    let reply: WorkerHttpResponse = serde_json::from_value(output)
        .map_err(|e| GatewayError::WorkerFailed(format!("invalid worker response: {e}")))?;
    worker_response(reply)
}

/// Reads at most `limit` bytes of the request body, refusing a larger
/// declared length before anything is read.
async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Vec<u8>, GatewayError> {
    let too_large = || GatewayError::BodyTooLarge { limit };
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(too_large());
    }

    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| GatewayError::BadRequest(format!("failed to read body: {e}")))?;
        if buf.len() + chunk.len() > limit {
            return Err(too_large());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

fn worker_response(reply: WorkerHttpResponse) -> Result<Response, GatewayError> {
    let status = StatusCode::from_u16(reply.status).map_err(|_| {
        GatewayError::WorkerFailed(format!("invalid status code {}", reply.status))
    })?;
    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = status;
    let response_headers = response.headers_mut();
    for (name, value) in reply.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                response_headers.append(name, value);
            }
            _ => debug!(header = %name, "dropping invalid worker header"),
        }
    }
    Ok(response)
}

async fn serve_bundle(
    State(state): State<Arc<GatewayState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let app = tenant_from_headers(&headers)?;
    if !state.sandbox.is_initialized() {
        return Err(GatewayError::NotInitialized);
    }
    let install = state
        .sandbox
        .install_id(&app)
        .ok_or_else(|| GatewayError::NotInstalled(app.to_string()))?;

    let bundle = match state.bundles.cached(&app, &install).await {
        Some(bundle) => bundle,
        None => {
            let descriptor = state.host.ui_bundle(&app).await.map_err(|e| {
                let error = e.into_service_error();
                if error.code == codes::APP_NOT_FOUND {
                    GatewayError::AppNotFound(app.to_string())
                } else {
                    GatewayError::BundleLookup(error)
                }
            })?;
            if descriptor.install_id != install {
                warn!(
                    app = %app,
                    mapped = %install,
                    published = %descriptor.install_id,
                    "published bundle differs from the install mapping"
                );
            }
            state.bundles.fetch(&descriptor).await?
        }
    };

    let file = bundle.read_file(uri.path()).await?;
    Ok(file_response(file))
}

fn file_response(file: BundleFile) -> Response {
    let mut response = file.body.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&file.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(Ok(value)) = file.csp.as_deref().map(HeaderValue::from_str) {
        headers.insert(header::CONTENT_SECURITY_POLICY, value);
    }
    if let Ok(value) = HeaderValue::from_str(&file.etag) {
        headers.insert(header::ETAG, value);
    }
    response
}
