//! Template group manifests
//!
//! Each `(groupId, artifactId)` pair owns one `meta.json` listing every
//! synced version in insertion order. The last entry is the latest
//! version. The remote store offers one version at a time as a
//! [`RemoteManifestFragment`].

use serde::{Deserialize, Deserializer, Serialize};
use std::io::Write;
use std::path::Path;

use super::error::RepositoryError;
use super::layout::normalize_path;

/// Treat an explicit JSON `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Local manifest for one template group (`meta.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub group_id: String,

    pub artifact_id: String,

    /// Versions in insertion order; the last one is the latest
    #[serde(rename = "configs", default, deserialize_with = "null_as_default")]
    pub versions: Vec<VersionEntry>,
}

/// One version's file listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub version: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<FileRecord>,
}

/// One template file within a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Directory of the file inside the version, e.g. `/controller`
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_path: String,

    pub filename: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,

    /// Declared content hash; the only change-detection signal
    #[serde(default, deserialize_with = "null_as_default")]
    pub sha256: String,

    /// Variables the template expects. The remote store spells this
    /// field `inputVarivales`.
    #[serde(
        rename = "inputVariables",
        alias = "inputVarivales",
        default,
        deserialize_with = "null_as_default"
    )]
    pub variables: Vec<TemplateVariable>,
}

/// A variable declared by a template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateVariable {
    #[serde(rename = "variableName", default, deserialize_with = "null_as_default")]
    pub name: String,

    #[serde(rename = "variableType", default, deserialize_with = "null_as_default")]
    pub kind: String,

    #[serde(rename = "variableComment", default, deserialize_with = "null_as_default")]
    pub comment: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub example: String,
}

/// The unit the remote manifest endpoint offers per query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteManifestFragment {
    pub group_id: String,

    pub artifact_id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,

    #[serde(rename = "config")]
    pub version: VersionEntry,
}

impl Manifest {
    /// Create an empty manifest for a group
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            versions: Vec::new(),
        }
    }

    /// Load a manifest, returning `None` if the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>, RepositoryError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RepositoryError::fs(path, e)),
        };

        let mut manifest: Self =
            serde_json::from_slice(&bytes).map_err(|source| RepositoryError::ManifestParseError {
                path: path.to_path_buf(),
                source,
            })?;

        for entry in &mut manifest.versions {
            if let Err(e) = entry.validate() {
                let dropped = entry.dedup_files();
                tracing::warn!(
                    "{}: {}; dropped {} duplicate record(s), keeping the last of each",
                    path.display(),
                    e,
                    dropped
                );
            }
        }

        Ok(Some(manifest))
    }

    /// Persist the manifest atomically.
    ///
    /// The document is written to a temporary file in the same directory
    /// and renamed over `path`, so readers see either the old or the new
    /// manifest, never a torn one.
    pub fn save(&self, path: &Path) -> Result<(), RepositoryError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| RepositoryError::fs(dir, e))?;

        let json = serde_json::to_vec_pretty(self).map_err(|source| {
            RepositoryError::ManifestParseError {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| RepositoryError::fs(dir, e))?;
        temp.write_all(&json)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| RepositoryError::fs(temp.path(), e))?;
        temp.persist(path)
            .map_err(|e| RepositoryError::fs(path, e.error))?;

        Ok(())
    }

    /// The most recently added version
    pub fn latest(&self) -> Option<&VersionEntry> {
        self.versions.last()
    }

    pub fn version(&self, version: &str) -> Option<&VersionEntry> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Replace any entry with the same version, then append `entry` as
    /// the latest
    pub fn upsert_version(&mut self, entry: VersionEntry) {
        self.versions.retain(|v| v.version != entry.version);
        self.versions.push(entry);
    }
}

impl VersionEntry {
    /// Check that no `(filePath, filename)` pair appears twice
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, record) in self.files.iter().enumerate() {
            if self.files[..i].iter().any(|earlier| earlier.same_location(record)) {
                anyhow::bail!(
                    "version {} lists {}/{} more than once",
                    self.version,
                    record.file_path,
                    record.filename
                );
            }
        }
        Ok(())
    }

    /// Find the record at `(file_path, filename)`
    pub fn file(&self, file_path: &str, filename: &str) -> Option<&FileRecord> {
        self.files
            .iter()
            .find(|f| f.filename == filename && same_dir(&f.file_path, file_path))
    }

    /// Drop records that repeat an earlier `(filePath, filename)` pair,
    /// keeping the last occurrence in its position
    pub fn dedup_files(&mut self) -> usize {
        let before = self.files.len();
        let mut kept: Vec<FileRecord> = Vec::with_capacity(before);
        for record in self.files.drain(..) {
            kept.retain(|k| !k.same_location(&record));
            kept.push(record);
        }
        self.files = kept;
        before - self.files.len()
    }
}

impl FileRecord {
    /// Whether two records address the same file within a version
    pub fn same_location(&self, other: &FileRecord) -> bool {
        self.filename == other.filename && same_dir(&self.file_path, &other.file_path)
    }
}

/// `/controller`, `controller/` and `\controller` name the same directory
fn same_dir(a: &str, b: &str) -> bool {
    fn trimmed(path: &str) -> String {
        normalize_path(path).trim_matches('/').to_string()
    }
    trimmed(a) == trimmed(b)
}

impl RemoteManifestFragment {
    /// The version entry this fragment contributes to a local manifest
    pub fn to_version_entry(&self) -> VersionEntry {
        let mut entry = self.version.clone();
        let dropped = entry.dedup_files();
        if dropped > 0 {
            tracing::warn!(
                "Remote manifest for {}/{} v{} repeats {} file record(s); keeping the last of each",
                self.group_id,
                self.artifact_id,
                entry.version,
                dropped
            );
        }
        entry
    }
}
