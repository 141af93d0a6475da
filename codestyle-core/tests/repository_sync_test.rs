//! End-to-end repository behaviour over HTTP

mod common;

use codestyle_core::repository::{
    HttpContentFetcher, HttpTemplateRemote, Manifest, RemoteManifestFragment, RepositoryConfig,
    SyncOutcome, TemplateRemote, TemplateRepository,
};
use common::{fragment_json, init_test_logging, sha256_hex, tar_gz, FakeStore};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

async fn open(store: &FakeStore, temp_dir: &TempDir) -> TemplateRepository {
    let config = RepositoryConfig {
        repository_dir: Some(temp_dir.path().join("repo")),
        remote_url: Some(store.base_url.clone()),
        ..Default::default()
    };
    let remote = HttpTemplateRemote::from_config(&config)
        .unwrap()
        .map(|r| Arc::new(r) as Arc<dyn TemplateRemote>);
    let fetcher = Arc::new(
        HttpContentFetcher::new(&store.blob_url(), &config.blob, config.connect_timeout()).unwrap(),
    );
    TemplateRepository::open(config, remote, fetcher).await.unwrap()
}

fn publish(store: &FakeStore, version: &str, body: &str) -> RemoteManifestFragment {
    let fragment = fragment_json(
        "artboy",
        "CRUD",
        version,
        &[("/controller", "Controller.ftl", body)],
    );
    store.state.set_fragment(fragment.clone());

    let body_path = format!("artboy/CRUD/{version}/controller/Controller.ftl");
    store.state.set_archive(tar_gz(&[(body_path.as_str(), body)]));

    serde_json::from_value(fragment).unwrap()
}

#[tokio::test]
async fn test_repeated_lookup_costs_no_archive_download() {
    init_test_logging();
    let store = FakeStore::start().await;
    let temp_dir = TempDir::new().unwrap();
    let repo = open(&store, &temp_dir).await;
    publish(&store, "1.0", "@RestController");

    let hit = repo.lookup("CRUD").await.unwrap();
    let manifest_path = hit.manifest_path.clone();
    let before = std::fs::read(&manifest_path).unwrap();

    repo.lookup("CRUD").await.unwrap();
    repo.lookup("CRUD").await.unwrap();

    assert_eq!(store.state.archive_hits(), 1);
    assert_eq!(std::fs::read(&manifest_path).unwrap(), before);
}

#[tokio::test]
async fn test_same_version_new_hash_is_redownloaded() {
    init_test_logging();
    let store = FakeStore::start().await;
    let temp_dir = TempDir::new().unwrap();
    let repo = open(&store, &temp_dir).await;

    publish(&store, "1.0", "first body");
    repo.lookup("CRUD").await.unwrap();

    let fragment = publish(&store, "1.0", "second body");
    let outcome = repo.sync_engine().sync(&fragment).await;
    assert!(matches!(outcome, SyncOutcome::Success { updated: true }));
    assert_eq!(store.state.archive_hits(), 2);

    let manifest = Manifest::load(&repo.layout().manifest_path("artboy", "CRUD"))
        .unwrap()
        .unwrap();
    assert_eq!(manifest.versions.len(), 1);
    assert_eq!(
        manifest.versions[0].files[0].sha256,
        sha256_hex("second body")
    );

    let file = repo
        .templates()
        .find_by_path("artboy/CRUD/1.0/controller/Controller.ftl")
        .unwrap();
    assert_eq!(file.read().unwrap(), "second body");
}

#[tokio::test]
async fn test_manifest_written_locally_uses_local_field_names() {
    init_test_logging();
    let store = FakeStore::start().await;
    let temp_dir = TempDir::new().unwrap();
    let repo = open(&store, &temp_dir).await;
    publish(&store, "1.0", "@RestController");

    let hit = repo.lookup("CRUD").await.unwrap();
    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(hit.manifest_path).unwrap()).unwrap();

    let file = &raw["configs"][0]["files"][0];
    assert_eq!(file["inputVariables"][0]["variableName"], "packageName");
    assert!(file.get("inputVarivales").is_none());
}

#[tokio::test]
async fn test_search_recovers_from_deleted_index() {
    init_test_logging();
    let store = FakeStore::start().await;
    let temp_dir = TempDir::new().unwrap();
    let repo = open(&store, &temp_dir).await;
    publish(&store, "1.0", "@RestController");
    repo.lookup("CRUD").await.unwrap();

    let index = repo.index();
    let expected = index.query("crud");
    assert!(expected.is_some());

    std::fs::remove_dir_all(index.index_dir()).unwrap();
    assert_eq!(index.query("crud"), expected);
}

#[tokio::test]
async fn test_blob_cache_over_http() {
    init_test_logging();
    let store = FakeStore::start().await;
    let temp_dir = TempDir::new().unwrap();
    let repo = open(&store, &temp_dir).await;

    let hash = sha256_hex("blob body");
    store
        .state
        .blobs
        .lock()
        .unwrap()
        .insert(hash.clone(), b"blob body".to_vec());

    assert!(!repo.cache().exists(&hash).await);
    assert!(repo.cache().ensure_cached(&hash).await);
    assert!(repo.cache().exists(&hash).await);
    assert_eq!(store.state.blob_hits(), 1);

    let missing = sha256_hex("never published");
    assert!(!repo.cache().ensure_cached(&missing).await);
    assert!(!repo.cache().ensure_cached(&missing).await);
    assert_eq!(store.state.blob_hits(), 2);
}
