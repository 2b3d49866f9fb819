mod common;

use common::{app, install};
use harbor_bundle::BundleBuilder;
use harbor_ipc::UiBundleDescriptor;
use harbor_sandbox::{BundleCache, GatewayError};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sample_bundle() -> Vec<u8> {
    BundleBuilder::new()
        .csp("default-src 'self'")
        .add_file("index.html", b"<h1>notes</h1>".to_vec())
        .add_file("assets/app.js", b"console.log(1)".to_vec())
        .add_typed_file("data.bin", "application/x-notes", vec![0, 1, 2])
        .build()
        .unwrap()
}

fn descriptor(server: &MockServer, install_id: &str) -> UiBundleDescriptor {
    UiBundleDescriptor {
        app_id: app("notes"),
        install_id: install(install_id),
        download_url: format!("{}/bundles/notes/{install_id}.zip", server.uri()),
        csp: None,
    }
}

async fn serve_bundle(server: &MockServer, install_id: &str, body: Vec<u8>, expected: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/bundles/notes/{install_id}.zip")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(expected)
        .mount(server)
        .await;
}

fn fetch_error(result: Result<impl std::fmt::Debug, GatewayError>) -> String {
    match result {
        Err(GatewayError::BundleFetch(message)) => message,
        other => panic!("expected a fetch error, got {other:?}"),
    }
}

// ── Fetch and lookup ────────────────────────────────────────────

#[tokio::test]
async fn fetched_bundle_is_found_by_later_lookups() {
    let server = MockServer::start().await;
    serve_bundle(&server, "v1", sample_bundle(), 1).await;
    let dir = TempDir::new().unwrap();
    let cache = BundleCache::new(dir.path(), reqwest::Client::new());

    assert!(cache.cached(&app("notes"), &install("v1")).await.is_none());
    let fetched = cache.fetch(&descriptor(&server, "v1")).await.unwrap();
    assert_eq!(fetched.dir(), dir.path().join("notes").join("v1"));
    assert_eq!(fetched.csp(), Some("default-src 'self'"));

    let cached = cache.cached(&app("notes"), &install("v1")).await.unwrap();
    assert_eq!(cached.content_hash(), fetched.content_hash());
    assert!(cache.cached(&app("notes"), &install("v2")).await.is_none());

    // Only the final directory remains; staging copies are gone.
    let entries: Vec<String> = std::fs::read_dir(dir.path().join("notes"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries, vec!["v1"]);
}

#[tokio::test]
async fn concurrent_fetches_of_one_install_agree() {
    let server = MockServer::start().await;
    // racing fetches may each miss the cache before any of them lands
    Mock::given(method("GET"))
        .and(path("/bundles/notes/v1.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(sample_bundle()))
        .expect(1..=4)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(BundleCache::new(dir.path(), reqwest::Client::new()));
    let descriptor = descriptor(&server, "v1");

    let fetches: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            let descriptor = descriptor.clone();
            tokio::spawn(async move { cache.fetch(&descriptor).await })
        })
        .collect();
    let mut hashes = Vec::new();
    for fetch in fetches {
        hashes.push(fetch.await.unwrap().unwrap().content_hash().to_string());
    }
    hashes.dedup();
    assert_eq!(hashes.len(), 1);

    let cached = cache.cached(&app("notes"), &install("v1")).await.unwrap();
    let file = cached.read_file("/assets/app.js").await.unwrap();
    assert_eq!(file.body, b"console.log(1)".to_vec());
}

#[tokio::test]
async fn fetch_reuses_a_cached_install() {
    let server = MockServer::start().await;
    serve_bundle(&server, "v1", sample_bundle(), 1).await;
    let dir = TempDir::new().unwrap();
    let cache = BundleCache::new(dir.path(), reqwest::Client::new());
    let descriptor = descriptor(&server, "v1");

    let first = cache.fetch(&descriptor).await.unwrap();
    for _ in 0..3 {
        let again = cache.fetch(&descriptor).await.unwrap();
        assert_eq!(again.content_hash(), first.content_hash());
    }
}

#[tokio::test]
async fn corrupt_record_is_a_cache_miss() {
    let dir = TempDir::new().unwrap();
    let record = dir.path().join("notes").join("v1").join(".harbor");
    std::fs::create_dir_all(&record).unwrap();
    std::fs::write(record.join("manifest.json"), b"{not json").unwrap();

    let cache = BundleCache::new(dir.path(), reqwest::Client::new());
    assert!(cache.cached(&app("notes"), &install("v1")).await.is_none());
}

#[tokio::test]
async fn bad_downloads_are_fetch_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bundles/notes/v1.zip"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    serve_bundle(&server, "v2", b"not a zip".to_vec(), 1).await;
    let reserved = BundleBuilder::new()
        .add_file("index.html", b"x".to_vec())
        .add_file(".harbor/manifest.json", b"{}".to_vec())
        .build()
        .unwrap();
    serve_bundle(&server, "v3", reserved, 1).await;

    let dir = TempDir::new().unwrap();
    let cache = BundleCache::new(dir.path(), reqwest::Client::new());

    let message = fetch_error(cache.fetch(&descriptor(&server, "v1")).await);
    assert!(message.contains("HTTP 404"), "{message}");
    let message = fetch_error(cache.fetch(&descriptor(&server, "v2")).await);
    assert!(message.starts_with("unextractable bundle"), "{message}");
    let message = fetch_error(cache.fetch(&descriptor(&server, "v3")).await);
    assert!(message.contains("reserved .harbor entry"), "{message}");

    for install_id in ["v1", "v2", "v3"] {
        assert!(cache.cached(&app("notes"), &install(install_id)).await.is_none());
    }
}

// ── Serving files ───────────────────────────────────────────────

#[tokio::test]
async fn files_resolve_with_declared_types() {
    let server = MockServer::start().await;
    serve_bundle(&server, "v1", sample_bundle(), 1).await;
    let dir = TempDir::new().unwrap();
    let cache = BundleCache::new(dir.path(), reqwest::Client::new());
    let mut with_csp = descriptor(&server, "v1");
    with_csp.csp = Some("default-src 'none'".into());
    let bundle = cache.fetch(&with_csp).await.unwrap();

    let script = bundle.read_file("/assets/app.js").await.unwrap();
    assert_eq!(script.content_type, "text/javascript; charset=utf-8");
    assert_eq!(script.csp.as_deref(), Some("default-src 'none'"));
    assert_eq!(script.etag, format!("\"{}\"", bundle.content_hash()));

    let data = bundle.read_file("data.bin").await.unwrap();
    assert_eq!(data.content_type, "application/x-notes");
    assert_eq!(data.body, vec![0, 1, 2]);

    for spa_route in ["/", "/notes/42", "/.harbor/manifest.json", "/./.harbor/manifest.json"] {
        let file = bundle.read_file(spa_route).await.unwrap();
        assert_eq!(file.body, b"<h1>notes</h1>".to_vec(), "{spa_route}");
        assert_eq!(file.content_type, "text/html; charset=utf-8");
    }
}

#[tokio::test]
async fn traversal_is_rejected() {
    let server = MockServer::start().await;
    serve_bundle(&server, "v1", sample_bundle(), 1).await;
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("secret.txt"), b"hidden").unwrap();
    let cache = BundleCache::new(dir.path(), reqwest::Client::new());
    let bundle = cache.fetch(&descriptor(&server, "v1")).await.unwrap();

    for attempt in ["/../../secret.txt", "/assets/../../../secret.txt", "/a\\b"] {
        assert!(
            matches!(bundle.read_file(attempt).await, Err(GatewayError::FileNotFound)),
            "{attempt}"
        );
    }
}
