use async_trait::async_trait;
use harbor_db::DbAccessKeys;
use harbor_host::{
    AppEntry, HostDispatcher, HostServices, ServiceFailure, StaticHostServices, StorageConfig,
    WorkerEntry,
};
use harbor_ipc::{
    ContentMetadata, ContentUrls, HostRequest, HostResponse, InstallMapping, MetadataUrlQuery,
    MetadataUrls, ObjectRef, Outcome, RequestHandler, UiBundleDescriptor, UiBundleQuery,
    WorkerConfigQuery, WorkerExecConfig, codes,
};
use harbor_types::{AppId, InstallId, WorkerId};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::Arc;

fn worker(id: &str, enabled: bool) -> WorkerEntry {
    WorkerEntry {
        worker_id: WorkerId::parse(id).unwrap(),
        entrypoint: format!("workers/{id}.js"),
        args: vec!["--flag".into()],
        env: BTreeMap::from([("MODE".into(), "test".into())]),
        working_dir: None,
        timeout_ms: Some(5_000),
        enabled,
    }
}

fn registry() -> Vec<AppEntry> {
    vec![
        AppEntry {
            app_id: AppId::parse("notes").unwrap(),
            install_id: InstallId::parse("v3").unwrap(),
            enabled: true,
            ui_bundle_url: Some("https://cdn.test/notes/v3.zip".into()),
            csp: Some("default-src 'self'".into()),
            workers: vec![worker("api", true), worker("cron", false)],
        },
        AppEntry {
            app_id: AppId::parse("archived").unwrap(),
            install_id: InstallId::parse("v1").unwrap(),
            enabled: false,
            ui_bundle_url: None,
            csp: None,
            workers: vec![worker("api", true)],
        },
        AppEntry {
            app_id: AppId::parse("headless").unwrap(),
            install_id: InstallId::parse("v1").unwrap(),
            enabled: true,
            ui_bundle_url: None,
            csp: None,
            workers: Vec::new(),
        },
    ]
}

fn storage() -> StorageConfig {
    StorageConfig {
        base_url: Some("https://objects.test/".into()),
        signing_secret: "s3cret".into(),
        url_ttl_secs: 60,
    }
}

fn dispatcher() -> (HostDispatcher, Arc<StaticHostServices>) {
    let services = Arc::new(StaticHostServices::new(registry(), storage()));
    (HostDispatcher::new(services.clone()), services)
}

fn config_query(app: &str, worker: &str) -> HostRequest {
    HostRequest::GetWorkerExecConfig(WorkerConfigQuery {
        app_id: AppId::parse(app).unwrap(),
        worker_id: WorkerId::parse(worker).unwrap(),
    })
}

fn failure_code<T: std::fmt::Debug>(outcome: Outcome<T>) -> String {
    match outcome {
        Outcome::Failure(error) => error.code,
        Outcome::Success(value) => panic!("expected failure, got {value:?}"),
    }
}

fn exec_config(response: HostResponse) -> Outcome<WorkerExecConfig> {
    match response {
        HostResponse::GetWorkerExecConfig(outcome) => outcome,
        other => panic!("unexpected response {other:?}"),
    }
}

fn bundle(response: HostResponse) -> Outcome<UiBundleDescriptor> {
    match response {
        HostResponse::GetUiBundle(outcome) => outcome,
        other => panic!("unexpected response {other:?}"),
    }
}

fn content(response: HostResponse) -> Outcome<ContentUrls> {
    match response {
        HostResponse::GetContentSignedUrls(outcome) => outcome,
        other => panic!("unexpected response {other:?}"),
    }
}

fn metadata(response: HostResponse) -> Outcome<MetadataUrls> {
    match response {
        HostResponse::GetMetadataSignedUrls(outcome) => outcome,
        other => panic!("unexpected response {other:?}"),
    }
}

// ── Worker lookups ──────────────────────────────────────────────

#[tokio::test]
async fn worker_config_for_enabled_worker() {
    let (dispatcher, _) = dispatcher();
    let config = exec_config(dispatcher.handle(config_query("notes", "api")).await)
        .into_result()
        .unwrap();

    assert_eq!(config.install_id.as_str(), "v3");
    assert_eq!(config.entrypoint, "workers/api.js");
    assert_eq!(config.args, vec!["--flag".to_string()]);
    assert_eq!(config.env.get("MODE").map(String::as_str), Some("test"));
    assert_eq!(config.timeout_ms, Some(5_000));
    assert_eq!(config.db_token, None);
}

#[tokio::test]
async fn worker_config_carries_a_db_token_for_its_app() {
    let keys = Arc::new(DbAccessKeys::new("host-secret"));
    let services = Arc::new(StaticHostServices::new(registry(), storage()));
    let dispatcher = HostDispatcher::new(services).with_db_access(keys.clone());

    let config = exec_config(dispatcher.handle(config_query("notes", "api")).await)
        .into_result()
        .unwrap();
    let token = config.db_token.unwrap();
    assert!(keys.verify(&AppId::parse("notes").unwrap(), &token));
    assert!(!keys.verify(&AppId::parse("headless").unwrap(), &token));
}

#[tokio::test]
async fn worker_lookup_failures_use_worker_codes() {
    let (dispatcher, _) = dispatcher();

    let cases = [
        (config_query("notes", "missing"), codes::WORKER_NOT_FOUND),
        (config_query("notes", "cron"), codes::WORKER_UNAVAILABLE),
        (config_query("nobody", "api"), codes::WORKER_NOT_FOUND),
        (config_query("archived", "api"), codes::WORKER_UNAVAILABLE),
    ];
    for (request, expected) in cases {
        let code = failure_code(exec_config(dispatcher.handle(request).await));
        assert_eq!(code, expected);
    }
}

// ── UI bundles ──────────────────────────────────────────────────

#[tokio::test]
async fn ui_bundle_descriptor() {
    let (dispatcher, _) = dispatcher();
    let request = HostRequest::GetUiBundle(UiBundleQuery {
        app_id: AppId::parse("notes").unwrap(),
    });
    let descriptor = bundle(dispatcher.handle(request).await).into_result().unwrap();

    assert_eq!(descriptor.install_id.as_str(), "v3");
    assert_eq!(descriptor.download_url, "https://cdn.test/notes/v3.zip");
    assert_eq!(descriptor.csp.as_deref(), Some("default-src 'self'"));
}

#[tokio::test]
async fn ui_bundle_failures_use_app_codes() {
    let (dispatcher, _) = dispatcher();
    let query = |app: &str| {
        HostRequest::GetUiBundle(UiBundleQuery {
            app_id: AppId::parse(app).unwrap(),
        })
    };

    assert_eq!(
        failure_code(bundle(dispatcher.handle(query("nobody")).await)),
        codes::APP_NOT_FOUND
    );
    assert_eq!(
        failure_code(bundle(dispatcher.handle(query("archived")).await)),
        codes::APP_UNAVAILABLE
    );
    assert_eq!(
        failure_code(bundle(dispatcher.handle(query("headless")).await)),
        codes::APP_NOT_FOUND
    );
}

// ── Signed URLs ─────────────────────────────────────────────────

fn split_signed(url: &str) -> (String, u64, String) {
    let (path, query) = url.split_once('?').unwrap();
    let mut expires = None;
    let mut signature = None;
    for pair in query.split('&') {
        match pair.split_once('=').unwrap() {
            ("expires", v) => expires = Some(v.parse().unwrap()),
            ("signature", v) => signature = Some(v.to_string()),
            other => panic!("unexpected query pair {other:?}"),
        }
    }
    (path.to_string(), expires.unwrap(), signature.unwrap())
}

#[tokio::test]
async fn content_url_is_signed_for_get() {
    let (dispatcher, services) = dispatcher();
    let request = HostRequest::GetContentSignedUrls(ObjectRef {
        object_id: "photo-1.jpg".into(),
    });
    let urls = content(dispatcher.handle(request).await).into_result().unwrap();

    let (path, expires, signature) = split_signed(&urls.download_url);
    assert_eq!(path, "https://objects.test/objects/photo-1.jpg");
    assert_eq!(signature, services.sign("GET", "/objects/photo-1.jpg", expires));
    assert_ne!(signature, services.sign("PUT", "/objects/photo-1.jpg", expires));
}

#[tokio::test]
async fn metadata_urls_are_signed_per_variant() {
    let (dispatcher, services) = dispatcher();
    let request = HostRequest::GetMetadataSignedUrls(MetadataUrlQuery {
        object_id: "clip".into(),
        variants: vec!["metadata.json".into(), "thumb.jpg".into()],
    });
    let urls = metadata(dispatcher.handle(request).await).into_result().unwrap();

    assert_eq!(
        urls.upload_urls.keys().cloned().collect::<Vec<_>>(),
        vec!["metadata.json".to_string(), "thumb.jpg".to_string()]
    );
    let (path, expires, signature) = split_signed(&urls.upload_urls["thumb.jpg"]);
    assert_eq!(path, "https://objects.test/objects/clip/thumb.jpg");
    assert_eq!(signature, services.sign("PUT", "/objects/clip/thumb.jpg", expires));
}

#[tokio::test]
async fn storage_failures_use_storage_codes() {
    let (dispatcher, _) = dispatcher();
    let bad_id = HostRequest::GetContentSignedUrls(ObjectRef {
        object_id: "../etc/passwd".into(),
    });
    assert_eq!(
        failure_code(content(dispatcher.handle(bad_id).await)),
        codes::OBJECT_NOT_FOUND
    );

    let unconfigured = HostDispatcher::new(Arc::new(StaticHostServices::new(
        registry(),
        StorageConfig::default(),
    )));
    let request = HostRequest::GetContentSignedUrls(ObjectRef {
        object_id: "photo".into(),
    });
    assert_eq!(
        failure_code(content(unconfigured.handle(request).await)),
        codes::STORAGE_ACCESS_FAILURE
    );
}

// ── Custom services ─────────────────────────────────────────────

struct BrokenServices;

#[async_trait]
impl HostServices for BrokenServices {
    async fn worker_exec_config(
        &self,
        _app: &AppId,
        _worker: &WorkerId,
    ) -> Result<WorkerExecConfig, ServiceFailure> {
        Err(ServiceFailure::Other("registry offline".into()))
    }

    async fn ui_bundle(&self, _app: &AppId) -> Result<UiBundleDescriptor, ServiceFailure> {
        Err(ServiceFailure::Other("registry offline".into()))
    }

    async fn content_signed_urls(&self, _object_id: &str) -> Result<ContentUrls, ServiceFailure> {
        Err(ServiceFailure::Other("signer offline".into()))
    }

    async fn metadata_signed_urls(
        &self,
        _object_id: &str,
        _variants: &[String],
    ) -> Result<MetadataUrls, ServiceFailure> {
        Err(ServiceFailure::Unavailable("bucket locked".into()))
    }

    async fn persist_content_metadata(
        &self,
        _metadata: &ContentMetadata,
    ) -> Result<(), ServiceFailure> {
        Err(ServiceFailure::Other("read-only".into()))
    }

    async fn install_mapping(&self) -> Result<InstallMapping, ServiceFailure> {
        Ok(InstallMapping::new())
    }
}

#[tokio::test]
async fn other_failures_map_to_internal_error_except_storage() {
    let dispatcher = HostDispatcher::new(Arc::new(BrokenServices));

    assert_eq!(
        failure_code(exec_config(dispatcher.handle(config_query("notes", "api")).await)),
        codes::INTERNAL_ERROR
    );
    let request = HostRequest::GetUiBundle(UiBundleQuery {
        app_id: AppId::parse("notes").unwrap(),
    });
    assert_eq!(
        failure_code(bundle(dispatcher.handle(request).await)),
        codes::INTERNAL_ERROR
    );
    let request = HostRequest::GetContentSignedUrls(ObjectRef {
        object_id: "photo".into(),
    });
    assert_eq!(
        failure_code(content(dispatcher.handle(request).await)),
        codes::STORAGE_ACCESS_FAILURE
    );
    let request = HostRequest::GetMetadataSignedUrls(MetadataUrlQuery {
        object_id: "photo".into(),
        variants: vec!["metadata.json".into()],
    });
    assert_eq!(
        failure_code(metadata(dispatcher.handle(request).await)),
        codes::STORAGE_ACCESS_FAILURE
    );
}

#[tokio::test]
async fn install_mapping_lists_enabled_apps() {
    let (_, services) = dispatcher();
    let mapping = services.install_mapping().await.unwrap();
    let apps: Vec<&str> = mapping.keys().map(|k| k.as_str()).collect();
    assert_eq!(apps, vec!["headless", "notes"]);

    assert!(services.remove_app(&AppId::parse("notes").unwrap()));
    assert!(!services.remove_app(&AppId::parse("notes").unwrap()));
    assert_eq!(services.install_mapping().await.unwrap().len(), 1);
}
