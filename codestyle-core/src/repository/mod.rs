//! Codestyle template repository
//!
//! A local mirror of versioned template groups published by a remote
//! template store. The repository keeps three things consistent:
//!
//! - Per-group manifests (`meta.json`) listing every synced version and
//!   the content hash of each template file
//! - A full-text index over group summaries for keyword lookup
//! - A bounded existence cache over content-addressed blobs
//!
//! # Architecture
//!
//! ```text
//! Remote template store
//!     │
//!     ├── /api/mcp/search   ← manifest fragment per keyword
//!     ├── /api/file/load    ← archive of one group/artifact subtree
//!     └── /<sha256>         ← content-addressed blobs
//!            │
//!            ▼
//!     SyncEngine ──────────► SearchIndex (upsert)
//!            │
//!            ▼
//!     <root>/<group>/<artifact>/meta.json
//!     <root>/<group>/<artifact>/<version>/<path>/<file>
//!     <root>/search-index/   ← rebuildable, never the source of truth
//! ```
//!
//! All state is owned by [`TemplateRepository`]; tests construct isolated
//! instances over temporary directories.

mod archive;
mod cache;
mod config;
mod error;
mod fetcher;
mod index;
mod layout;
mod lookup;
mod lru;
mod manifest;
mod remote;
mod sync;
mod tokenizer;

pub use archive::{extract_archive, ArchiveFormat};
pub use cache::{CacheStats, ExistenceCache};
pub use config::{BlobConfig, CacheConfig, RepositoryConfig};
pub use error::RepositoryError;
pub use fetcher::{ContentFetcher, FetchOutcome, HttpContentFetcher};
pub use index::{SearchHit, SearchIndex};
pub use layout::{normalize_path, RepositoryLayout, MANIFEST_FILE_NAME};
pub use lookup::{TemplateFile, TemplateLookup};
pub use lru::LruMap;
pub use manifest::{
    FileRecord, Manifest, RemoteManifestFragment, TemplateVariable, VersionEntry,
};
pub use remote::{HttpTemplateRemote, TemplateRemote};
pub use sync::{SyncEngine, SyncOutcome};

use std::sync::Arc;

/// Owns the search index, existence cache and sync engine for one
/// repository root.
pub struct TemplateRepository {
    config: RepositoryConfig,
    layout: RepositoryLayout,
    remote: Option<Arc<dyn TemplateRemote>>,
    index: Arc<SearchIndex>,
    cache: ExistenceCache,
    sync: SyncEngine,
}

impl TemplateRepository {
    /// Open a repository, preparing its root directory and rebuilding the
    /// search index from the manifests on disk.
    ///
    /// `remote` is `None` when no remote store is configured; lookups then
    /// only consult the local index.
    pub async fn open(
        config: RepositoryConfig,
        remote: Option<Arc<dyn TemplateRemote>>,
        fetcher: Arc<dyn ContentFetcher>,
    ) -> anyhow::Result<Self> {
        let root = config.prepare_repository_dir()?;
        let layout = RepositoryLayout::new(root, &config.index_dir_name);

        let index = Arc::new(SearchIndex::new(layout.clone()));
        let rebuild_target = Arc::clone(&index);
        let groups = tokio::task::spawn_blocking(move || rebuild_target.rebuild()).await??;

        let blob_dir = config.blob_dir(layout.root());
        let cache = ExistenceCache::new(blob_dir, &config.cache, fetcher);

        let sync_remote = remote.clone();
        let sync = SyncEngine::new(layout.clone(), sync_remote, Arc::clone(&index));

        tracing::info!(
            "Opened template repository at {} ({} group(s) indexed)",
            layout.root().display(),
            groups
        );

        Ok(Self {
            config,
            layout,
            remote,
            index,
            cache,
            sync,
        })
    }

    /// Resolve a keyword to a template group.
    ///
    /// With remote search enabled, the remote fragment for `keyword` is
    /// synced first and the synced group is returned. When the remote is
    /// disabled, unavailable, or the sync fails, the local index answers.
    pub async fn lookup(&self, keyword: &str) -> Option<SearchHit> {
        if let Some(hit) = self.lookup_remote(keyword).await {
            return Some(hit);
        }

        let index = Arc::clone(&self.index);
        let keyword = keyword.to_string();
        match tokio::task::spawn_blocking(move || index.query(&keyword)).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!("Search task failed: {}", e);
                None
            }
        }
    }

    async fn lookup_remote(&self, keyword: &str) -> Option<SearchHit> {
        if !self.config.remote_search_enabled {
            return None;
        }
        let remote = self.remote.as_ref()?;

        let fragment = remote.fetch_manifest(keyword).await?;
        match self.sync.sync(&fragment).await {
            SyncOutcome::Success { .. } => Some(SearchHit {
                group_id: fragment.group_id.clone(),
                artifact_id: fragment.artifact_id.clone(),
                description: fragment.description.clone(),
                manifest_path: self
                    .layout
                    .manifest_path(&fragment.group_id, &fragment.artifact_id),
            }),
            SyncOutcome::Failure(e) => {
                tracing::warn!(
                    "Sync of {}/{} failed, falling back to local index: {}",
                    fragment.group_id,
                    fragment.artifact_id,
                    e
                );
                None
            }
        }
    }

    /// Read-side queries over the synced template files
    pub fn templates(&self) -> TemplateLookup<'_> {
        TemplateLookup::new(&self.layout)
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn layout(&self) -> &RepositoryLayout {
        &self.layout
    }

    pub fn index(&self) -> &Arc<SearchIndex> {
        &self.index
    }

    pub fn cache(&self) -> &ExistenceCache {
        &self.cache
    }

    pub fn sync_engine(&self) -> &SyncEngine {
        &self.sync
    }
}
