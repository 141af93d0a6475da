//! Remote template store client
//!
//! The store exposes two endpoints used by the sync path:
//! - `GET /api/mcp/search?templateKeyword=<kw>` returns one manifest fragment
//! - `GET /api/file/load?paths=/<groupId>/<artifactId>` returns an archive
//!   of that subtree

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::config::RepositoryConfig;
use super::error::RepositoryError;
use super::manifest::RemoteManifestFragment;

pub(crate) const USER_AGENT: &str = concat!("codestyle-core/", env!("CARGO_PKG_VERSION"));

/// Trait for remote template stores
#[async_trait]
pub trait TemplateRemote: Send + Sync {
    /// Look up the fragment the store offers for a keyword.
    ///
    /// Any failure (unreachable, 4xx/5xx, timeout, undecodable body) is
    /// reported as `None`.
    async fn fetch_manifest(&self, keyword: &str) -> Option<RemoteManifestFragment>;

    /// Download the archive covering one group/artifact subtree
    async fn fetch_archive(
        &self,
        group_id: &str,
        artifact_id: &str,
    ) -> Result<Vec<u8>, RepositoryError>;

    /// Remote identifier for logging/debugging
    fn name(&self) -> &'static str;
}

/// HTTP client for the remote template store
pub struct HttpTemplateRemote {
    client: reqwest::Client,
    base_url: String,
    manifest_timeout: std::time::Duration,
    archive_timeout: std::time::Duration,
}

impl HttpTemplateRemote {
    /// Create a client for `base_url` using the configured timeouts
    pub fn new(base_url: &str, config: &RepositoryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            manifest_timeout: config.manifest_timeout(),
            archive_timeout: config.archive_timeout(),
        })
    }

    /// Create a client from the config's `remote_url`, if one is set
    pub fn from_config(config: &RepositoryConfig) -> Result<Option<Self>> {
        config
            .remote_url
            .as_deref()
            .map(|url| Self::new(url, config))
            .transpose()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TemplateRemote for HttpTemplateRemote {
    async fn fetch_manifest(&self, keyword: &str) -> Option<RemoteManifestFragment> {
        let url = format!("{}/api/mcp/search", self.base_url);
        debug!("Fetching remote manifest for '{}' from {}", keyword, url);

        let response = match self
            .client
            .get(&url)
            .query(&[("templateKeyword", keyword)])
            .timeout(self.manifest_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Remote manifest request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                "Remote manifest endpoint returned HTTP {} for '{}'",
                response.status(),
                keyword
            );
            return None;
        }

        match response.json::<RemoteManifestFragment>().await {
            Ok(fragment) => Some(fragment),
            Err(e) => {
                warn!("Failed to decode remote manifest for '{}': {}", keyword, e);
                None
            }
        }
    }

    async fn fetch_archive(
        &self,
        group_id: &str,
        artifact_id: &str,
    ) -> Result<Vec<u8>, RepositoryError> {
        let url = format!("{}/api/file/load", self.base_url);
        let subtree = format!("/{group_id}/{artifact_id}");
        debug!("Downloading archive for {} from {}", subtree, url);

        let response = self
            .client
            .get(&url)
            .query(&[("paths", subtree.as_str())])
            .timeout(self.archive_timeout)
            .send()
            .await
            .map_err(RepositoryError::network)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RepositoryError::RemoteNotFound { resource: subtree });
        }
        if !status.is_success() {
            return Err(RepositoryError::network(format!(
                "HTTP {status} downloading {subtree}"
            )));
        }

        let bytes = response.bytes().await.map_err(RepositoryError::network)?;
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// In-memory remote for testing; counts every call
#[cfg(test)]
pub struct MockRemote {
    pub fragment: parking_lot::Mutex<Option<RemoteManifestFragment>>,
    pub archive: parking_lot::Mutex<Result<Vec<u8>, String>>,
    pub manifest_calls: std::sync::atomic::AtomicUsize,
    pub archive_calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockRemote {
    pub fn new(archive: Vec<u8>) -> Self {
        Self {
            fragment: parking_lot::Mutex::new(None),
            archive: parking_lot::Mutex::new(Ok(archive)),
            manifest_calls: Default::default(),
            archive_calls: Default::default(),
        }
    }

    pub fn failing(reason: &str) -> Self {
        let remote = Self::new(Vec::new());
        *remote.archive.lock() = Err(reason.to_string());
        remote
    }

    pub fn set_archive(&self, archive: Vec<u8>) {
        *self.archive.lock() = Ok(archive);
    }

    pub fn archive_calls(&self) -> usize {
        self.archive_calls
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl TemplateRemote for MockRemote {
    async fn fetch_manifest(&self, _keyword: &str) -> Option<RemoteManifestFragment> {
        self.manifest_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.fragment.lock().clone()
    }

    async fn fetch_archive(
        &self,
        _group_id: &str,
        _artifact_id: &str,
    ) -> Result<Vec<u8>, RepositoryError> {
        self.archive_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.archive
            .lock()
            .clone()
            .map_err(RepositoryError::network)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
