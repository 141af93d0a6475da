//! Content existence cache
//!
//! Answers "is the blob for this content hash available locally" from a
//! bounded LRU map before touching the disk, and falls back to a
//! [`ContentFetcher`] when asked to make a blob available.
//!
//! Capacity and recency are global: one [`LruMap`] behind one mutex. The
//! lock is never held across a disk probe or a fetch.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::config::CacheConfig;
use super::fetcher::{ContentFetcher, FetchOutcome};
use super::layout::is_single_segment;
use super::lru::LruMap;

/// What the cache knows about a hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Existence {
    /// The blob is on disk
    Present,
    /// A disk probe found nothing; a fetch has not been tried
    Absent,
    /// A fetch was tried and failed; do not try again until invalidated
    Unavailable,
}

/// Counters for cache activity
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    disk_probes: AtomicU64,
    fetches: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn disk_probes(&self) -> u64 {
        self.disk_probes.load(Ordering::Relaxed)
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

/// Bounded existence cache over a content-addressed blob directory
pub struct ExistenceCache {
    blob_dir: PathBuf,
    entries: Mutex<LruMap<String, Existence>>,
    fetcher: Arc<dyn ContentFetcher>,
    stats: CacheStats,
}

impl ExistenceCache {
    pub fn new(blob_dir: PathBuf, config: &CacheConfig, fetcher: Arc<dyn ContentFetcher>) -> Self {
        let max_size = config.max_size.max(1);

        debug!(
            "Existence cache initialized: capacity={}, concurrency_level={}, blob_dir={}",
            max_size,
            config.concurrency_level,
            blob_dir.display()
        );

        Self {
            blob_dir,
            entries: Mutex::new(LruMap::new(max_size)),
            fetcher,
            stats: CacheStats::default(),
        }
    }

    pub fn blob_dir(&self) -> &Path {
        &self.blob_dir
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Whether the blob for `hash` is available locally.
    ///
    /// A cached answer is returned without touching the disk. On a miss the
    /// disk is probed exactly once and the answer, present or not, is cached.
    pub async fn exists(&self, hash: &str) -> bool {
        self.existence(hash).await == Some(Existence::Present)
    }

    /// Make the blob for `hash` available locally, fetching it if needed.
    ///
    /// A failed fetch is remembered; later calls return `false` without
    /// another network attempt until [`invalidate`](Self::invalidate).
    pub async fn ensure_cached(&self, hash: &str) -> bool {
        let Some(dest) = self.blob_path(hash) else {
            return false;
        };

        match self.existence(hash).await {
            Some(Existence::Present) => return true,
            Some(Existence::Unavailable) => {
                debug!("Blob {} previously unavailable, not refetching", hash);
                return false;
            }
            Some(Existence::Absent) | None => {}
        }

        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        let outcome = self.fetcher.fetch(hash, &dest).await;
        let state = match outcome {
            FetchOutcome::Fetched => Existence::Present,
            FetchOutcome::NotFound | FetchOutcome::Failed => Existence::Unavailable,
        };
        self.record(hash, state);

        debug!("Fetch of blob {} finished: {:?}", hash, outcome);
        outcome.is_fetched()
    }

    /// Forget everything known about `hash`
    pub fn invalidate(&self, hash: &str) {
        self.entries.lock().remove(hash);
    }

    /// Forget everything
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached hashes
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Maximum number of cached hashes
    pub fn capacity(&self) -> usize {
        self.entries.lock().capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached state, probing the disk on a miss. `None` for unusable hashes.
    async fn existence(&self, hash: &str) -> Option<Existence> {
        let path = self.blob_path(hash)?;

        let cached = self.entries.lock().get(hash).copied();
        if let Some(state) = cached {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Existence cache hit for {}: {:?}", hash, state);
            return Some(state);
        }

        self.stats.disk_probes.fetch_add(1, Ordering::Relaxed);
        let state = match tokio::fs::try_exists(&path).await {
            Ok(true) => Existence::Present,
            Ok(false) => Existence::Absent,
            Err(e) => {
                debug!("Disk probe for {} failed: {}", path.display(), e);
                Existence::Absent
            }
        };
        self.record(hash, state);
        Some(state)
    }

    fn record(&self, hash: &str, state: Existence) {
        if let Some((evicted, _)) = self.entries.lock().insert(hash.to_string(), state) {
            debug!("Evicted {} from existence cache", evicted);
        }
    }

    fn blob_path(&self, hash: &str) -> Option<PathBuf> {
        if hash.trim().is_empty() || !is_single_segment(hash) {
            return None;
        }
        Some(self.blob_dir.join(hash))
    }
}
