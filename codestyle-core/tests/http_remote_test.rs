//! HTTP clients against an in-process template store

mod common;

use codestyle_core::repository::{
    BlobConfig, ContentFetcher, FetchOutcome, HttpContentFetcher, HttpTemplateRemote,
    RepositoryConfig, RepositoryError, TemplateRemote,
};
use common::{fragment_json, init_test_logging, tar_gz, FakeStore};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

fn blob_config(max_retries: u32) -> BlobConfig {
    BlobConfig {
        max_retries,
        timeout_seconds: 2,
        directory: None,
    }
}

#[tokio::test]
async fn test_manifest_endpoint_decodes_fragment() {
    init_test_logging();
    let store = FakeStore::start().await;
    store.state.set_fragment(fragment_json(
        "artboy",
        "CRUD",
        "1.0",
        &[("/controller", "Controller.ftl", "@RestController")],
    ));

    let remote = HttpTemplateRemote::new(&store.base_url, &RepositoryConfig::default()).unwrap();
    let fragment = remote.fetch_manifest("CRUD").await.unwrap();

    assert_eq!(fragment.group_id, "artboy");
    assert_eq!(fragment.version.version, "1.0");
    assert_eq!(fragment.version.files[0].variables[0].name, "packageName");
}

#[tokio::test]
async fn test_manifest_endpoint_error_is_absent() {
    init_test_logging();
    let store = FakeStore::start().await;

    let remote = HttpTemplateRemote::new(&store.base_url, &RepositoryConfig::default()).unwrap();
    assert!(remote.fetch_manifest("nothing").await.is_none());
    assert_eq!(store.state.search_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_archive_endpoint_requests_group_subtree() {
    init_test_logging();
    let store = FakeStore::start().await;
    let archive = tar_gz(&[("artboy/CRUD/1.0/a.ftl", "a")]);
    store.state.set_archive(archive.clone());

    let remote = HttpTemplateRemote::new(&store.base_url, &RepositoryConfig::default()).unwrap();
    let bytes = remote.fetch_archive("artboy", "CRUD").await.unwrap();

    assert_eq!(bytes, archive);
    assert_eq!(
        store.state.last_archive_paths.lock().unwrap().as_deref(),
        Some("/artboy/CRUD")
    );
}

#[tokio::test]
async fn test_archive_endpoint_failure_is_network_error() {
    init_test_logging();
    let store = FakeStore::start().await;

    let remote = HttpTemplateRemote::new(&store.base_url, &RepositoryConfig::default()).unwrap();
    let err = remote.fetch_archive("artboy", "CRUD").await.unwrap_err();
    assert!(matches!(err, RepositoryError::NetworkUnavailable { .. }));
}

#[tokio::test]
async fn test_blob_fetch_writes_file() {
    init_test_logging();
    let store = FakeStore::start().await;
    store
        .state
        .blobs
        .lock()
        .unwrap()
        .insert("abc123".to_string(), b"template bytes".to_vec());

    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("blobs/abc123");
    let fetcher =
        HttpContentFetcher::new(&store.blob_url(), &blob_config(2), Duration::from_secs(2)).unwrap();

    assert_eq!(fetcher.fetch("abc123", &dest).await, FetchOutcome::Fetched);
    assert_eq!(std::fs::read(&dest).unwrap(), b"template bytes");
    assert_eq!(store.state.blob_hits(), 1);
}

#[tokio::test]
async fn test_blob_not_found_is_terminal() {
    init_test_logging();
    let store = FakeStore::start().await;

    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("missing");
    let fetcher =
        HttpContentFetcher::new(&store.blob_url(), &blob_config(2), Duration::from_secs(2)).unwrap();

    assert_eq!(fetcher.fetch("missing", &dest).await, FetchOutcome::NotFound);
    assert_eq!(store.state.blob_hits(), 1);
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_blob_server_errors_are_retried() {
    init_test_logging();
    let store = FakeStore::start().await;
    store
        .state
        .blobs
        .lock()
        .unwrap()
        .insert("flaky".to_string(), b"eventually".to_vec());
    store.state.blob_failures.store(2, Ordering::SeqCst);

    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("flaky");
    let fetcher =
        HttpContentFetcher::new(&store.blob_url(), &blob_config(2), Duration::from_secs(2)).unwrap();

    assert_eq!(fetcher.fetch("flaky", &dest).await, FetchOutcome::Fetched);
    assert_eq!(store.state.blob_hits(), 3);
}

#[tokio::test]
async fn test_blob_retries_are_bounded() {
    init_test_logging();
    let store = FakeStore::start().await;
    store.state.blob_failures.store(10, Ordering::SeqCst);

    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("down");
    let fetcher =
        HttpContentFetcher::new(&store.blob_url(), &blob_config(2), Duration::from_secs(2)).unwrap();

    assert_eq!(fetcher.fetch("down", &dest).await, FetchOutcome::Failed);
    assert_eq!(store.state.blob_hits(), 3);
    assert!(!dest.exists());
}
