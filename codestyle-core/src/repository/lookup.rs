//! Read-side queries over synced templates

use std::path::PathBuf;
use tracing::debug;

use super::error::RepositoryError;
use super::layout::{is_single_segment, relative_path, RepositoryLayout};
use super::manifest::{FileRecord, Manifest};

/// A template file of the latest version whose body is on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub record: FileRecord,
    pub body_path: PathBuf,
}

impl TemplateFile {
    /// `groupId/artifactId/version/filePath/filename`
    pub fn exact_path(&self) -> String {
        let dir = self.record.file_path.trim_matches('/');
        let mut path = format!("{}/{}/{}", self.group_id, self.artifact_id, self.version);
        if !dir.is_empty() {
            path.push('/');
            path.push_str(dir);
        }
        path.push('/');
        path.push_str(&self.record.filename);
        path
    }

    /// Read the template body as UTF-8
    pub fn read(&self) -> Result<String, RepositoryError> {
        std::fs::read_to_string(&self.body_path)
            .map_err(|e| RepositoryError::fs(&self.body_path, e))
    }
}

/// Lookups against one repository layout
pub struct TemplateLookup<'a> {
    layout: &'a RepositoryLayout,
}

impl<'a> TemplateLookup<'a> {
    pub fn new(layout: &'a RepositoryLayout) -> Self {
        Self { layout }
    }

    /// Files of the group's latest version whose bodies exist on disk.
    ///
    /// Ids that are not a single path segment match nothing.
    pub fn latest_files(&self, group_id: &str, artifact_id: &str) -> Vec<TemplateFile> {
        if !is_single_segment(group_id) || !is_single_segment(artifact_id) {
            debug!("Rejected template ids {:?}/{:?}", group_id, artifact_id);
            return Vec::new();
        }
        let manifest = match Manifest::load(&self.layout.manifest_path(group_id, artifact_id)) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return Vec::new(),
            Err(e) => {
                debug!("No templates for {}/{}: {}", group_id, artifact_id, e);
                return Vec::new();
            }
        };
        self.present_files(&manifest)
    }

    /// Resolve `groupId/artifactId/version/filePath/filename` against the
    /// group's latest version
    pub fn find_by_path(&self, exact_path: &str) -> Option<TemplateFile> {
        let wanted = relative_path(exact_path)?;
        let mut parts = wanted.iter().filter_map(|p| p.to_str());
        let group_id = parts.next()?;
        let artifact_id = parts.next()?;
        parts.next()?;

        self.latest_files(group_id, artifact_id)
            .into_iter()
            .find(|file| relative_path(&file.exact_path()).as_ref() == Some(&wanted))
    }

    fn present_files(&self, manifest: &Manifest) -> Vec<TemplateFile> {
        let Some(latest) = manifest.latest() else {
            return Vec::new();
        };

        latest
            .files
            .iter()
            .filter_map(|record| {
                let body_path = self.layout.body_path(
                    &manifest.group_id,
                    &manifest.artifact_id,
                    &latest.version,
                    &record.file_path,
                    &record.filename,
                )?;
                body_path.is_file().then(|| TemplateFile {
                    group_id: manifest.group_id.clone(),
                    artifact_id: manifest.artifact_id.clone(),
                    version: latest.version.clone(),
                    record: record.clone(),
                    body_path,
                })
            })
            .collect()
    }
}
