//! On-disk layout of a template repository.
//!
//! ```text
//! <root>/<groupId>/<artifactId>/meta.json
//! <root>/<groupId>/<artifactId>/<version>/<filePath>/<filename>
//! <root>/<groupId>/<artifactId>/<version>/README.md
//! <root>/<index-dir>/
//! ```
//!
//! Every path derived from remote-supplied strings goes through
//! [`relative_path`] so it can never leave the repository root.

use std::path::{Component, Path, PathBuf};

/// File name of the per-group manifest
pub const MANIFEST_FILE_NAME: &str = "meta.json";

/// Per-version readme used as the search description
pub const README_FILE_NAME: &str = "README.md";

/// Unify separators to `/` and collapse repeated separators.
///
/// Empty input is returned unchanged.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut normalized = String::with_capacity(unified.len());
    let mut previous_was_separator = false;
    for c in unified.chars() {
        if c == '/' {
            if previous_was_separator {
                continue;
            }
            previous_was_separator = true;
        } else {
            previous_was_separator = false;
        }
        normalized.push(c);
    }
    normalized
}

/// Resolve a remote-supplied path to a relative path that stays inside
/// its base directory.
///
/// Leading separators are stripped, `.` segments dropped and `..` resolved.
/// Returns `None` when the path would escape or contains a null byte.
/// An empty result is allowed (the base directory itself).
pub(crate) fn relative_path(path: &str) -> Option<PathBuf> {
    let normalized = normalize_path(path);
    let mut components = Vec::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(s) => {
                if s.as_encoded_bytes().contains(&0) {
                    return None;
                }
                components.push(s);
            }
            Component::CurDir | Component::RootDir => {}
            Component::Prefix(_) => return None,
            Component::ParentDir => {
                components.pop()?;
            }
        }
    }
    Some(components.into_iter().collect())
}

/// A group id, artifact id, version or file name must be exactly one
/// normal path component.
pub(crate) fn is_single_segment(segment: &str) -> bool {
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(s)), None) if s == segment && !segment.contains('\0')
    )
}

/// Path conventions for one repository root
#[derive(Debug, Clone)]
pub struct RepositoryLayout {
    root: PathBuf,
    index_dir_name: String,
}

impl RepositoryLayout {
    pub fn new(root: impl Into<PathBuf>, index_dir_name: &str) -> Self {
        Self {
            root: root.into(),
            index_dir_name: index_dir_name.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.join(&self.index_dir_name)
    }

    /// Whether a top-level directory name is reserved and must not be
    /// treated as a group
    pub fn is_reserved(&self, name: &str) -> bool {
        name == self.index_dir_name || name.starts_with('.')
    }

    pub fn group_dir(&self, group_id: &str, artifact_id: &str) -> PathBuf {
        self.root.join(group_id).join(artifact_id)
    }

    pub fn manifest_path(&self, group_id: &str, artifact_id: &str) -> PathBuf {
        self.group_dir(group_id, artifact_id).join(MANIFEST_FILE_NAME)
    }

    pub fn version_dir(&self, group_id: &str, artifact_id: &str, version: &str) -> PathBuf {
        self.group_dir(group_id, artifact_id).join(version)
    }

    pub fn readme_path(&self, group_id: &str, artifact_id: &str, version: &str) -> PathBuf {
        self.version_dir(group_id, artifact_id, version)
            .join(README_FILE_NAME)
    }

    /// Location of a template body, or `None` if the record's path would
    /// escape the version directory
    pub fn body_path(
        &self,
        group_id: &str,
        artifact_id: &str,
        version: &str,
        file_path: &str,
        filename: &str,
    ) -> Option<PathBuf> {
        if !is_single_segment(filename) {
            return None;
        }
        let relative = relative_path(file_path)?;
        Some(
            self.version_dir(group_id, artifact_id, version)
                .join(relative)
                .join(filename),
        )
    }
}
