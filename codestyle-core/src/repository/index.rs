//! Full-text index over template groups
//!
//! One document per `(groupId, artifactId)`; the index is a derived
//! projection of the manifests on disk and can always be rebuilt from them.
//! A single reader/writer lock guards it: `rebuild` and `upsert` are
//! exclusive, queries share access.

use parking_lot::{RwLock, RwLockWriteGuard};
use std::path::{Path, PathBuf};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED, STRING,
};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info, warn};

use super::error::RepositoryError;
use super::layout::{RepositoryLayout, MANIFEST_FILE_NAME};
use super::manifest::Manifest;
use super::tokenizer::{self, CJK_TOKENIZER};

const WRITER_HEAP_BYTES: usize = 20_000_000;

/// The best match for a keyword
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub group_id: String,
    pub artifact_id: String,
    pub description: String,
    pub manifest_path: PathBuf,
}

struct Fields {
    group_id: Field,
    artifact_id: Field,
    description: Field,
    manifest_path: Field,
    content: Field,
}

/// Text indexed with the CJK-aware analyzer, positions included for phrases
fn full_text() -> TextOptions {
    TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(CJK_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    )
}

impl Fields {
    fn schema() -> (Schema, Self) {
        let mut builder = Schema::builder();
        let fields = Fields {
            group_id: builder.add_text_field("groupId", STRING | STORED),
            artifact_id: builder.add_text_field("artifactId", STRING | STORED),
            description: builder.add_text_field("description", full_text().set_stored()),
            manifest_path: builder.add_text_field("manifestPath", STRING | STORED),
            content: builder.add_text_field("content", full_text()),
        };
        (builder.build(), fields)
    }
}

/// Keyword index over the repository's manifests
pub struct SearchIndex {
    layout: RepositoryLayout,
    schema: Schema,
    fields: Fields,
    handle: RwLock<Option<Index>>,
}

impl SearchIndex {
    /// Create an index over `layout`. Nothing is read or written until the
    /// first rebuild, upsert or query.
    pub fn new(layout: RepositoryLayout) -> Self {
        let (schema, fields) = Fields::schema();
        Self {
            layout,
            schema,
            fields,
            handle: RwLock::new(None),
        }
    }

    pub fn index_dir(&self) -> PathBuf {
        self.layout.index_dir()
    }

    /// Recreate the index from every manifest under the repository root.
    ///
    /// Returns the number of indexed groups.
    pub fn rebuild(&self) -> Result<usize, RepositoryError> {
        let mut handle = self.handle.write();
        self.rebuild_locked(&mut handle)
    }

    /// Replace the document for `manifest_path` with a fresh one
    pub fn upsert(
        &self,
        group_id: &str,
        artifact_id: &str,
        description: &str,
        manifest_path: &Path,
    ) -> Result<(), RepositoryError> {
        let mut handle = self.handle.write();

        if !self.storage_present() {
            // The manifest is already on disk, so a rebuild picks it up
            self.rebuild_locked(&mut handle)?;
            return Ok(());
        }

        let index = match handle.take() {
            Some(index) => index,
            None => self.open_index()?,
        };

        let path = manifest_path.to_string_lossy();
        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        writer.delete_term(Term::from_field_text(self.fields.manifest_path, &path));
        writer.add_document(self.document(group_id, artifact_id, description, &path))?;
        writer.commit()?;
        writer.wait_merging_threads()?;

        *handle = Some(index);
        debug!("Upserted search document for {}/{}", group_id, artifact_id);
        Ok(())
    }

    /// Best match for `keyword`, or `None`.
    ///
    /// Tokens are OR-combined; a CJK run matches as a phrase of bigrams, so
    /// any part of a Chinese description of two or more characters hits. If the index storage has gone missing it is
    /// rebuilt before answering. Every failure is reported as no match.
    pub fn query(&self, keyword: &str) -> Option<SearchHit> {
        match self.try_query(keyword) {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Search for '{}' failed: {}", keyword, e);
                None
            }
        }
    }

    fn try_query(&self, keyword: &str) -> Result<Option<SearchHit>, RepositoryError> {
        let query_text = sanitize_query(keyword);
        if query_text.is_empty() {
            return Ok(None);
        }

        let mut handle = self.handle.read();
        if !self.storage_present() {
            drop(handle);
            let mut exclusive = self.handle.write();
            if !self.storage_present() {
                info!("Search index missing, rebuilding before query");
                self.rebuild_locked(&mut exclusive)?;
            }
            handle = RwLockWriteGuard::downgrade(exclusive);
        }

        let opened;
        let index = match handle.as_ref() {
            Some(index) => index,
            None => {
                opened = self.open_index()?;
                &opened
            }
        };

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let searcher = reader.searcher();

        let parser = QueryParser::for_index(index, vec![self.fields.content]);
        let query = parser
            .parse_query(&query_text)
            .map_err(|e| RepositoryError::IndexMissingOrCorrupt {
                reason: format!("query '{query_text}' rejected: {e}"),
            })?;

        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        let Some((_score, address)) = top.into_iter().next() else {
            return Ok(None);
        };

        let doc: TantivyDocument = searcher.doc(address)?;
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        Ok(Some(SearchHit {
            group_id: text(self.fields.group_id),
            artifact_id: text(self.fields.artifact_id),
            description: text(self.fields.description),
            manifest_path: PathBuf::from(text(self.fields.manifest_path)),
        }))
    }

    /// Human description of a group: the latest version's readme, else
    /// the artifact id
    pub fn describe(&self, manifest: &Manifest) -> String {
        manifest
            .latest()
            .map(|latest| {
                self.layout
                    .readme_path(&manifest.group_id, &manifest.artifact_id, &latest.version)
            })
            .and_then(|readme| std::fs::read_to_string(readme).ok())
            .unwrap_or_else(|| manifest.artifact_id.clone())
    }

    /// Number of indexed groups, or `None` if the index cannot be read
    pub fn document_count(&self) -> Option<u64> {
        let handle = self.handle.read();
        let opened;
        let index = match handle.as_ref() {
            Some(index) => index,
            None => {
                opened = self.open_index().ok()?;
                &opened
            }
        };
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .ok()?;
        Some(reader.searcher().num_docs())
    }

    fn open_index(&self) -> Result<Index, RepositoryError> {
        let index = Index::open_in_dir(self.index_dir())?;
        tokenizer::register(&index);
        Ok(index)
    }

    fn storage_present(&self) -> bool {
        MmapDirectory::open(self.index_dir())
            .ok()
            .and_then(|dir| Index::exists(&dir).ok())
            .unwrap_or(false)
    }

    fn rebuild_locked(&self, handle: &mut Option<Index>) -> Result<usize, RepositoryError> {
        // Release the old mmap before removing its files
        *handle = None;

        let dir = self.index_dir();
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RepositoryError::fs(&dir, e)),
        }
        std::fs::create_dir_all(&dir).map_err(|e| RepositoryError::fs(&dir, e))?;

        let index = Index::create_in_dir(&dir, self.schema.clone())?;
        tokenizer::register(&index);
        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;

        let mut indexed = 0;
        for manifest_path in self.scan_manifests()? {
            let manifest = match Manifest::load(&manifest_path) {
                Ok(Some(manifest)) => manifest,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping unreadable manifest: {}", e);
                    continue;
                }
            };

            let description = self.describe(&manifest);
            writer.add_document(self.document(
                &manifest.group_id,
                &manifest.artifact_id,
                &description,
                &manifest_path.to_string_lossy(),
            ))?;
            indexed += 1;
        }

        writer.commit()?;
        writer.wait_merging_threads()?;
        *handle = Some(index);

        info!("Rebuilt search index with {} template group(s)", indexed);
        Ok(indexed)
    }

    /// `<root>/<group>/<artifact>/meta.json` for every group on disk
    fn scan_manifests(&self) -> Result<Vec<PathBuf>, RepositoryError> {
        let root = self.layout.root();
        let mut found = Vec::new();

        for group in subdirectories(root)? {
            let reserved = group
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |name| self.layout.is_reserved(name));
            if reserved {
                continue;
            }

            let artifacts = match subdirectories(&group) {
                Ok(artifacts) => artifacts,
                Err(e) => {
                    warn!("Skipping unreadable group directory: {}", e);
                    continue;
                }
            };
            for artifact in artifacts {
                let manifest_path = artifact.join(MANIFEST_FILE_NAME);
                if manifest_path.is_file() {
                    found.push(manifest_path);
                }
            }
        }

        found.sort();
        Ok(found)
    }

    fn document(
        &self,
        group_id: &str,
        artifact_id: &str,
        description: &str,
        manifest_path: &str,
    ) -> TantivyDocument {
        doc!(
            self.fields.group_id => group_id,
            self.fields.artifact_id => artifact_id,
            self.fields.description => description,
            self.fields.manifest_path => manifest_path,
            self.fields.content => format!("{group_id} {artifact_id} {description}"),
        )
    }
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>, RepositoryError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RepositoryError::fs(dir, e)),
    };

    Ok(entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect())
}

/// Neutralize query syntax so free text can never produce a parse error.
///
/// Metacharacters become token separators and the text is lowercased,
/// which also keeps `AND`/`OR`/`NOT` from being read as operators. The
/// index tokenizer drops the same characters, so matching is unchanged.
fn sanitize_query(keyword: &str) -> String {
    keyword
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
