//! Repository error types with clear, actionable messages

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised inside the repository subsystems.
///
/// These never cross the public boundaries of [`SyncEngine`], [`SearchIndex`]
/// or [`ExistenceCache`]: each collapses them into its own result shape.
///
/// [`SyncEngine`]: super::SyncEngine
/// [`SearchIndex`]: super::SearchIndex
/// [`ExistenceCache`]: super::ExistenceCache
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The remote store could not be reached or answered with an error
    #[error("Remote template store unavailable: {reason}")]
    NetworkUnavailable { reason: String },

    /// The remote store definitively has no such resource
    #[error("Remote template store has no resource at {resource}")]
    RemoteNotFound { resource: String },

    /// A downloaded archive could not be decoded
    #[error("Template archive is corrupt or in an unsupported format: {reason}")]
    ArchiveCorrupt { reason: String },

    /// Reading or writing the local repository failed
    #[error("File system error at {path}")]
    FileSystemError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The search index is missing, locked, or unreadable
    #[error("Search index is missing or corrupt: {reason}")]
    IndexMissingOrCorrupt { reason: String },

    /// A manifest on disk or from the remote could not be parsed
    #[error("Failed to parse manifest {path}")]
    ManifestParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl RepositoryError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RepositoryError::FileSystemError {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn network(reason: impl std::fmt::Display) -> Self {
        RepositoryError::NetworkUnavailable {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt(reason: impl std::fmt::Display) -> Self {
        RepositoryError::ArchiveCorrupt {
            reason: reason.to_string(),
        }
    }

    /// Whether repeating the failed operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RepositoryError::NetworkUnavailable { .. } | RepositoryError::FileSystemError { .. }
        )
    }
}

impl From<tantivy::TantivyError> for RepositoryError {
    fn from(e: tantivy::TantivyError) -> Self {
        RepositoryError::IndexMissingOrCorrupt {
            reason: e.to_string(),
        }
    }
}
