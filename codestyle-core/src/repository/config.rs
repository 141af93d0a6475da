//! Repository configuration
//!
//! ## Configuration Sources (in precedence order)
//!
//! 1. An explicit path passed to [`RepositoryConfig::load_from_path`]
//! 2. `repository.yaml` in the platform config directory
//!    (e.g. `~/.config/codestyle/repository.yaml`)
//! 3. Built-in defaults
//!
//! ## Example
//!
//! ```yaml
//! local_path: /home/me/.cache/codestyle
//! remote_url: https://templates.example.com
//! remote_search_enabled: true
//! cache:
//!   max_size: 10000
//!   concurrency_level: 16
//! blob:
//!   max_retries: 2
//!   timeout_seconds: 10
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory created under `local_path` when no repository dir is given
pub const DEFAULT_REPOSITORY_DIR_NAME: &str = "codestyle-cache";

/// Directory under the repository root holding the search index
pub const DEFAULT_INDEX_DIR_NAME: &str = "search-index";

/// Directory under the repository root holding content-addressed blobs
pub const DEFAULT_BLOB_DIR_NAME: &str = ".blobs";

/// Top-level repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Base path for local state
    #[serde(default = "default_local_path")]
    pub local_path: PathBuf,

    /// Repository root; defaults to `<local_path>/codestyle-cache`
    #[serde(default)]
    pub repository_dir: Option<PathBuf>,

    /// Base URL of the remote template store; `None` disables the remote
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Whether keyword lookups consult the remote manifest endpoint
    #[serde(default = "default_true")]
    pub remote_search_enabled: bool,

    /// Timeout for the manifest endpoint in seconds
    #[serde(default = "default_manifest_timeout")]
    pub manifest_timeout_seconds: u64,

    /// Timeout for the archive endpoint in seconds
    #[serde(default = "default_archive_timeout")]
    pub archive_timeout_seconds: u64,

    /// Connect timeout shared by all endpoints in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Name of the search index directory under the repository root
    #[serde(default = "default_index_dir_name")]
    pub index_dir_name: String,

    #[serde(default)]
    pub blob: BlobConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// Blob endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_blob_timeout")]
    pub timeout_seconds: u64,

    /// Where fetched blobs are stored; defaults to `<repository root>/.blobs`
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Existence cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached hashes
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    /// Expected number of concurrent callers. Capacity and recency stay
    /// global whatever the value.
    #[serde(default = "default_concurrency_level")]
    pub concurrency_level: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            local_path: default_local_path(),
            repository_dir: None,
            remote_url: None,
            remote_search_enabled: true,
            manifest_timeout_seconds: default_manifest_timeout(),
            archive_timeout_seconds: default_archive_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            index_dir_name: default_index_dir_name(),
            blob: BlobConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_seconds: default_blob_timeout(),
            directory: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            concurrency_level: default_concurrency_level(),
        }
    }
}

fn default_local_path() -> PathBuf {
    directories::ProjectDirs::from("top", "codestyle", "codestyle")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .or_else(|| dirs::cache_dir().map(|d| d.join("codestyle")))
        .unwrap_or_else(std::env::temp_dir)
}

fn default_true() -> bool {
    true
}

fn default_manifest_timeout() -> u64 {
    30
}

fn default_archive_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_index_dir_name() -> String {
    DEFAULT_INDEX_DIR_NAME.to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_blob_timeout() -> u64 {
    10
}

fn default_cache_max_size() -> usize {
    10_000
}

fn default_concurrency_level() -> usize {
    16
}

impl RepositoryConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path, using defaults when the
    /// file does not exist
    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::debug!(
                "No repository config at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path).with_context(|| {
            format!("Failed to read repository config: {}", config_path.display())
        })?;
        let config: Self = serde_yaml_ng::from_str(&content).with_context(|| {
            format!("Failed to parse repository config: {}", config_path.display())
        })?;

        config
            .validate()
            .with_context(|| format!("Invalid repository config: {}", config_path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.cache.max_size == 0 {
            anyhow::bail!("cache.max_size must be greater than zero");
        }
        if self.cache.concurrency_level == 0 {
            anyhow::bail!("cache.concurrency_level must be greater than zero");
        }
        if self.index_dir_name.is_empty() || self.index_dir_name.contains(['/', '\\']) {
            anyhow::bail!(
                "index_dir_name must be a single directory name, got '{}'",
                self.index_dir_name
            );
        }
        Ok(())
    }

    fn default_config_path() -> Result<PathBuf> {
        let config_dir = directories::ProjectDirs::from("top", "codestyle", "codestyle")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .or_else(|| dirs::config_dir().map(|d| d.join("codestyle")))
            .context("Could not determine config directory")?;
        Ok(config_dir.join("repository.yaml"))
    }

    /// The configured repository root, before any fallback
    pub fn repository_dir(&self) -> PathBuf {
        self.repository_dir
            .clone()
            .unwrap_or_else(|| self.local_path.join(DEFAULT_REPOSITORY_DIR_NAME))
    }

    /// Create the repository root, falling back to a directory under the
    /// system temp dir when the configured one cannot be created
    pub fn prepare_repository_dir(&self) -> Result<PathBuf> {
        let primary = self.repository_dir();
        match std::fs::create_dir_all(&primary) {
            Ok(()) => Ok(primary),
            Err(e) => {
                let fallback = std::env::temp_dir().join(DEFAULT_REPOSITORY_DIR_NAME);
                tracing::warn!(
                    "Cannot create repository dir {} ({}), falling back to {}",
                    primary.display(),
                    e,
                    fallback.display()
                );
                std::fs::create_dir_all(&fallback).with_context(|| {
                    format!("Failed to create repository directory: {}", fallback.display())
                })?;
                Ok(fallback)
            }
        }
    }

    /// Blob store directory for a prepared repository root
    pub fn blob_dir(&self, root: &Path) -> PathBuf {
        self.blob
            .directory
            .clone()
            .unwrap_or_else(|| root.join(DEFAULT_BLOB_DIR_NAME))
    }

    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_seconds)
    }

    pub fn archive_timeout(&self) -> Duration {
        Duration::from_secs(self.archive_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}
