//! Test helpers shared by the integration tests
//!
//! Provides logging setup, archive builders, and an in-process HTTP server
//! standing in for the remote template store.

#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Hex sha256 of a template body
pub fn sha256_hex(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

/// Build a tarball from `(path, contents)` pairs
pub fn tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let encoder = GzEncoder::new(&mut bytes, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }
    bytes
}

/// Remote manifest JSON as the store serves it, including its
/// `inputVarivales` spelling
pub fn fragment_json(
    group_id: &str,
    artifact_id: &str,
    version: &str,
    files: &[(&str, &str, &str)],
) -> serde_json::Value {
    let files: Vec<serde_json::Value> = files
        .iter()
        .map(|(file_path, filename, body)| {
            serde_json::json!({
                "filePath": file_path,
                "filename": filename,
                "description": format!("{filename} template"),
                "sha256": sha256_hex(body),
                "inputVarivales": [{
                    "variableName": "packageName",
                    "variableType": "String",
                    "variableComment": "Base package",
                    "example": "com.example"
                }]
            })
        })
        .collect();

    serde_json::json!({
        "groupId": group_id,
        "artifactId": artifact_id,
        "description": format!("{artifact_id} templates"),
        "config": { "version": version, "files": files }
    })
}

/// Mutable state behind the fake template store
#[derive(Default)]
pub struct StoreState {
    pub fragment: Mutex<Option<serde_json::Value>>,
    pub archive: Mutex<Option<Vec<u8>>>,
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
    /// Blob requests answered with 500 before the real answer
    pub blob_failures: AtomicUsize,
    pub search_hits: AtomicUsize,
    pub archive_hits: AtomicUsize,
    pub blob_hits: AtomicUsize,
    pub last_archive_paths: Mutex<Option<String>>,
}

impl StoreState {
    pub fn set_fragment(&self, fragment: serde_json::Value) {
        *self.fragment.lock().unwrap() = Some(fragment);
    }

    pub fn set_archive(&self, archive: Vec<u8>) {
        *self.archive.lock().unwrap() = Some(archive);
    }

    pub fn archive_hits(&self) -> usize {
        self.archive_hits.load(Ordering::SeqCst)
    }

    pub fn blob_hits(&self) -> usize {
        self.blob_hits.load(Ordering::SeqCst)
    }
}

/// A fake template store listening on a loopback port
pub struct FakeStore {
    pub base_url: String,
    pub state: Arc<StoreState>,
}

impl FakeStore {
    pub async fn start() -> Self {
        let state = Arc::new(StoreState::default());
        let app = Router::new()
            .route("/api/mcp/search", get(search))
            .route("/api/file/load", get(load))
            .route("/blobs/{hash}", get(blob))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn blob_url(&self) -> String {
        format!("{}/blobs", self.base_url)
    }
}

async fn search(
    State(state): State<Arc<StoreState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.search_hits.fetch_add(1, Ordering::SeqCst);
    if !params.contains_key("templateKeyword") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    match state.fragment.lock().unwrap().clone() {
        Some(fragment) => axum::Json(fragment).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn load(
    State(state): State<Arc<StoreState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.archive_hits.fetch_add(1, Ordering::SeqCst);
    *state.last_archive_paths.lock().unwrap() = params.get("paths").cloned();
    match state.archive.lock().unwrap().clone() {
        Some(bytes) => (StatusCode::OK, bytes).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn blob(State(state): State<Arc<StoreState>>, Path(hash): Path<String>) -> Response {
    state.blob_hits.fetch_add(1, Ordering::SeqCst);

    let remaining = state.blob_failures.load(Ordering::SeqCst);
    if remaining > 0 {
        state.blob_failures.store(remaining - 1, Ordering::SeqCst);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match state.blobs.lock().unwrap().get(&hash).cloned() {
        Some(bytes) => (StatusCode::OK, bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
