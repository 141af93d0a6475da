//! Manifest reconciliation against the remote store
//!
//! A sync compares a [`RemoteManifestFragment`] with the local manifest
//! using declared content hashes as the only staleness signal. Up-to-date
//! groups cost no network traffic. Stale groups are refreshed by
//! downloading one archive for the whole group, extracting it, and then
//! committing the merged manifest atomically.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::archive::extract_archive;
use super::error::RepositoryError;
use super::index::SearchIndex;
use super::layout::{is_single_segment, RepositoryLayout};
use super::manifest::{Manifest, RemoteManifestFragment};
use super::remote::TemplateRemote;

/// Result of a sync
#[derive(Debug)]
pub enum SyncOutcome {
    /// The local group matches the fragment. `updated` is true when an
    /// archive was downloaded to get there.
    Success { updated: bool },
    /// The group could not be brought up to date; no manifest was written
    Failure(RepositoryError),
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success { .. })
    }
}

/// Reconciles remote fragments into the local repository
pub struct SyncEngine {
    layout: RepositoryLayout,
    remote: Option<Arc<dyn TemplateRemote>>,
    index: Arc<SearchIndex>,
}

impl SyncEngine {
    pub fn new(
        layout: RepositoryLayout,
        remote: Option<Arc<dyn TemplateRemote>>,
        index: Arc<SearchIndex>,
    ) -> Self {
        Self {
            layout,
            remote,
            index,
        }
    }

    /// Bring the local copy of the fragment's group up to date.
    ///
    /// Never panics or returns an error; failures are reported as
    /// [`SyncOutcome::Failure`]. On a successful update the search index
    /// entry for the group is refreshed.
    pub async fn sync(&self, fragment: &RemoteManifestFragment) -> SyncOutcome {
        match self.try_sync(fragment).await {
            Ok(updated) => SyncOutcome::Success { updated },
            Err(e) => {
                warn!(
                    "Sync of {}/{} v{} failed: {}",
                    fragment.group_id, fragment.artifact_id, fragment.version.version, e
                );
                SyncOutcome::Failure(e)
            }
        }
    }

    /// Whether the local group differs from the fragment.
    ///
    /// Reads the local manifest and probes the disk synchronously.
    pub fn needs_update(&self, fragment: &RemoteManifestFragment) -> bool {
        !matches!(inspect(&self.layout, fragment), Ok(None))
    }

    async fn try_sync(&self, fragment: &RemoteManifestFragment) -> Result<bool, RepositoryError> {
        validate_fragment(fragment)?;

        let group_id = fragment.group_id.as_str();
        let artifact_id = fragment.artifact_id.as_str();
        let manifest_path = self.layout.manifest_path(group_id, artifact_id);

        let layout = self.layout.clone();
        let local = fragment.clone();
        let state = tokio::task::spawn_blocking(move || inspect(&layout, &local))
            .await
            .map_err(|e| RepositoryError::fs(&manifest_path, std::io::Error::other(e)))??;

        let Some((reason, mut merged)) = state else {
            debug!("{}/{} v{} is up to date", group_id, artifact_id, fragment.version.version);
            return Ok(false);
        };
        info!(
            "{}/{} v{} needs update: {}",
            group_id, artifact_id, fragment.version.version, reason
        );

        let remote = self.remote.as_ref().ok_or_else(|| {
            RepositoryError::network("no remote template store configured")
        })?;

        let archive = remote.fetch_archive(group_id, artifact_id).await?;
        debug!(
            "Downloaded {} byte archive for {}/{} via {}",
            archive.len(),
            group_id,
            artifact_id,
            remote.name()
        );

        let group_dir = self.layout.group_dir(group_id, artifact_id);
        let (g, a) = (group_id.to_string(), artifact_id.to_string());
        let entry = fragment.to_version_entry();
        let save_path = manifest_path.clone();
        let (written, merged) = tokio::task::spawn_blocking(move || {
            let written = extract_archive(&archive, &group_dir, &g, &a)?;
            merged.group_id = g;
            merged.artifact_id = a;
            merged.upsert_version(entry);
            merged.save(&save_path)?;
            Ok::<_, RepositoryError>((written, merged))
        })
        .await
        .map_err(|e| RepositoryError::corrupt(format!("extraction task failed: {e}")))??;

        info!(
            "Synced {}/{} v{} ({} file(s) extracted, {} version(s) on disk)",
            group_id,
            artifact_id,
            fragment.version.version,
            written,
            merged.versions.len()
        );

        self.refresh_index(merged, manifest_path).await;
        Ok(true)
    }

    async fn refresh_index(&self, manifest: Manifest, manifest_path: std::path::PathBuf) {
        let index = Arc::clone(&self.index);
        let result = tokio::task::spawn_blocking(move || {
            let description = index.describe(&manifest);
            index.upsert(
                &manifest.group_id,
                &manifest.artifact_id,
                &description,
                &manifest_path,
            )
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Search index not updated after sync: {}", e),
            Err(e) => warn!("Search index update task failed: {}", e),
        }
    }
}

/// Read the group's local state before anything is downloaded.
///
/// `None` when the group is current. Otherwise the reason it is stale and
/// the manifest the merge starts from; an unparseable manifest is replaced
/// by an empty one.
fn inspect(
    layout: &RepositoryLayout,
    fragment: &RemoteManifestFragment,
) -> Result<Option<(String, Manifest)>, RepositoryError> {
    let group_id = fragment.group_id.as_str();
    let artifact_id = fragment.artifact_id.as_str();

    let manifest = match Manifest::load(&layout.manifest_path(group_id, artifact_id)) {
        Ok(Some(manifest)) => manifest,
        Ok(None) => {
            return Ok(Some((
                "no local manifest".to_string(),
                Manifest::new(group_id, artifact_id),
            )))
        }
        Err(e @ RepositoryError::ManifestParseError { .. }) => {
            return Ok(Some((
                format!("local manifest unreadable, replacing it ({e})"),
                Manifest::new(group_id, artifact_id),
            )))
        }
        Err(e) => return Err(e),
    };

    Ok(staleness(layout, fragment, &manifest).map(|reason| (reason, manifest)))
}

/// Why `manifest` is stale relative to the fragment, or `None` if current
fn staleness(
    layout: &RepositoryLayout,
    fragment: &RemoteManifestFragment,
    manifest: &Manifest,
) -> Option<String> {
    let group_id = fragment.group_id.as_str();
    let artifact_id = fragment.artifact_id.as_str();
    let version = fragment.version.version.as_str();

    let Some(local) = manifest.version(version) else {
        return Some(format!("version {version} not present locally"));
    };

    for remote_file in &fragment.version.files {
        let label = format!("{}/{}", remote_file.file_path, remote_file.filename);

        let on_disk = layout
            .body_path(
                group_id,
                artifact_id,
                version,
                &remote_file.file_path,
                &remote_file.filename,
            )
            .is_some_and(|path| path.is_file());
        if !on_disk {
            return Some(format!("{label} missing on disk"));
        }

        match local.file(&remote_file.file_path, &remote_file.filename) {
            None => return Some(format!("{label} not in local manifest")),
            Some(local_file) if local_file.sha256 != remote_file.sha256 => {
                return Some(format!(
                    "{label} hash changed ({} -> {})",
                    local_file.sha256, remote_file.sha256
                ));
            }
            Some(_) => {}
        }
    }

    None
}

/// Ids and versions become directory names, so each must be exactly one
/// path segment
fn validate_fragment(fragment: &RemoteManifestFragment) -> Result<(), RepositoryError> {
    let segments = [
        ("groupId", &fragment.group_id),
        ("artifactId", &fragment.artifact_id),
        ("version", &fragment.version.version),
    ];
    for (field, value) in segments {
        if !is_single_segment(value) {
            return Err(RepositoryError::fs(
                value.as_str(),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{field} '{value}' is not a valid directory name"),
                ),
            ));
        }
    }
    Ok(())
}
