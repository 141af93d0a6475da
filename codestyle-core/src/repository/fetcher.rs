//! Content-addressed blob fetching
//!
//! Blobs live at `GET {base}/{sha256}`. A 404 is a definitive answer and
//! ends the attempt loop; any other failure is retried up to the bound.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::config::BlobConfig;
use super::remote::USER_AGENT;

/// Result of fetching one blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The blob was written to its destination
    Fetched,
    /// The store definitively has no such blob
    NotFound,
    /// Every attempt failed
    Failed,
}

impl FetchOutcome {
    pub fn is_fetched(self) -> bool {
        self == FetchOutcome::Fetched
    }
}

/// Trait for blob sources behind the existence cache
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch the blob for `hash` into `dest`.
    ///
    /// Implementations own their retry and timeout policy and must not
    /// leave a partial file at `dest`.
    async fn fetch(&self, hash: &str, dest: &Path) -> FetchOutcome;
}

/// HTTP blob fetcher with bounded retries
pub struct HttpContentFetcher {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
    attempt_timeout: Duration,
}

impl HttpContentFetcher {
    pub fn new(base_url: &str, config: &BlobConfig, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            attempt_timeout: Duration::from_secs(config.timeout_seconds),
        })
    }

    async fn attempt(&self, url: &str, dest: &Path) -> Attempt {
        let response = match self
            .client
            .get(url)
            .timeout(self.attempt_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(e.to_string()),
        };

        match response.status() {
            reqwest::StatusCode::OK => {}
            reqwest::StatusCode::NOT_FOUND => return Attempt::NotFound,
            status => return Attempt::Retry(format!("HTTP {status}")),
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return Attempt::Retry(e.to_string()),
        };

        match write_atomically(dest, bytes).await {
            Ok(()) => Attempt::Done,
            Err(e) => Attempt::Retry(format!("write {}: {}", dest.display(), e)),
        }
    }
}

enum Attempt {
    Done,
    NotFound,
    Retry(String),
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, hash: &str, dest: &Path) -> FetchOutcome {
        let url = format!("{}/{}", self.base_url, hash);

        for attempt in 0..=self.max_retries {
            match self.attempt(&url, dest).await {
                Attempt::Done => {
                    info!("Fetched blob {} -> {}", hash, dest.display());
                    return FetchOutcome::Fetched;
                }
                Attempt::NotFound => {
                    warn!("Blob {} does not exist on the remote store", hash);
                    return FetchOutcome::NotFound;
                }
                Attempt::Retry(reason) => {
                    warn!(
                        "Attempt {}/{} to fetch {} failed: {}",
                        attempt + 1,
                        self.max_retries + 1,
                        url,
                        reason
                    );
                }
            }
        }

        debug!("Giving up on blob {}", hash);
        FetchOutcome::Failed
    }
}

/// Write through a uniquely named sibling temp file so `dest` only ever
/// holds a complete blob. Concurrent writers of one hash never share a
/// temp file, and a failed persist removes its temp file.
async fn write_atomically<B>(dest: &Path, bytes: B) -> std::io::Result<()>
where
    B: AsRef<[u8]> + Send + 'static,
{
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(bytes.as_ref())?;
        temp.persist(&dest).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}
