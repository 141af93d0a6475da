//! Template archive extraction
//!
//! The archive endpoint returns one group/artifact subtree, either as a
//! gzip-compressed tarball or a zip file. Entries may be rooted at the
//! repository root (`groupId/artifactId/...`) or at the group directory
//! itself; both land under `<root>/<groupId>/<artifactId>/`.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use super::error::RepositoryError;
use super::layout::{relative_path, MANIFEST_FILE_NAME};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";

/// Supported archive encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from leading magic bytes
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(GZIP_MAGIC) {
            Some(ArchiveFormat::TarGz)
        } else if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC) {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }
}

/// Extract a group archive into `group_dir`.
///
/// Manifest entries are skipped, as are entries whose path would leave
/// `group_dir`. Returns the number of files written.
pub fn extract_archive(
    bytes: &[u8],
    group_dir: &Path,
    group_id: &str,
    artifact_id: &str,
) -> Result<usize, RepositoryError> {
    let format = ArchiveFormat::detect(bytes)
        .ok_or_else(|| RepositoryError::corrupt("unrecognized archive signature"))?;

    std::fs::create_dir_all(group_dir).map_err(|e| RepositoryError::fs(group_dir, e))?;

    let target = EntryTarget {
        group_dir,
        group_id,
        artifact_id,
    };
    let written = match format {
        ArchiveFormat::TarGz => extract_tar_gz(bytes, &target)?,
        ArchiveFormat::Zip => extract_zip(bytes, &target)?,
    };

    tracing::debug!(
        "Extracted {} file(s) from {:?} archive into {}",
        written,
        format,
        group_dir.display()
    );
    Ok(written)
}

struct EntryTarget<'a> {
    group_dir: &'a Path,
    group_id: &'a str,
    artifact_id: &'a str,
}

impl EntryTarget<'_> {
    /// Where an archive entry belongs, or `None` if it must be skipped
    fn resolve(&self, entry_name: &str) -> Option<PathBuf> {
        let Some(relative) = relative_path(entry_name) else {
            tracing::warn!("Skipping archive entry outside the template directory: {entry_name}");
            return None;
        };

        let relative = relative
            .strip_prefix(Path::new(self.group_id).join(self.artifact_id))
            .map(Path::to_path_buf)
            .unwrap_or(relative);

        if relative.as_os_str().is_empty() {
            return None;
        }
        if relative.file_name().is_some_and(|name| name == MANIFEST_FILE_NAME) {
            tracing::debug!("Skipping manifest entry in archive: {entry_name}");
            return None;
        }

        Some(self.group_dir.join(relative))
    }
}

fn extract_tar_gz(bytes: &[u8], target: &EntryTarget<'_>) -> Result<usize, RepositoryError> {
    let decoder = flate2::read::GzDecoder::new(Cursor::new(bytes));
    let mut archive = tar::Archive::new(decoder);

    let mut written = 0;
    let entries = archive.entries().map_err(RepositoryError::corrupt)?;
    for entry in entries {
        let mut entry = entry.map_err(RepositoryError::corrupt)?;
        let name = entry
            .path()
            .map_err(RepositoryError::corrupt)?
            .to_string_lossy()
            .into_owned();

        let Some(dest) = target.resolve(&name) else {
            continue;
        };

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            std::fs::create_dir_all(&dest).map_err(|e| RepositoryError::fs(&dest, e))?;
        } else if entry_type.is_file() {
            create_parent(&dest)?;
            entry
                .unpack(&dest)
                .map_err(|e| RepositoryError::fs(&dest, e))?;
            written += 1;
        } else {
            tracing::debug!("Skipping non-regular archive entry: {name}");
        }
    }

    Ok(written)
}

fn extract_zip(bytes: &[u8], target: &EntryTarget<'_>) -> Result<usize, RepositoryError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(RepositoryError::corrupt)?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(RepositoryError::corrupt)?;
        let name = file.name().to_string();

        let Some(dest) = target.resolve(&name) else {
            continue;
        };

        if file.is_dir() {
            std::fs::create_dir_all(&dest).map_err(|e| RepositoryError::fs(&dest, e))?;
            continue;
        }

        create_parent(&dest)?;
        let dir = dest.parent().unwrap_or(target.group_dir);
        let mut out =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| RepositoryError::fs(dir, e))?;
        std::io::copy(&mut file, &mut out).map_err(|e| copy_error(&name, &dest, e))?;
        out.persist(&dest)
            .map_err(|e| RepositoryError::fs(&dest, e.error))?;
        written += 1;
    }

    Ok(written)
}

/// Decompression failures are the archive's fault, anything else the disk's
fn copy_error(entry_name: &str, dest: &Path, e: std::io::Error) -> RepositoryError {
    match e.kind() {
        std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
            RepositoryError::corrupt(format!("{entry_name}: {e}"))
        }
        _ => RepositoryError::fs(dest, e),
    }
}

fn create_parent(dest: &Path) -> Result<(), RepositoryError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RepositoryError::fs(parent, e))?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::{stored_zip, tar_gz, zip};
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_format() {
        assert_eq!(
            ArchiveFormat::detect(&tar_gz(&[("a.txt", "a")])),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::detect(&zip(&[("a.txt", "a")])),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(ArchiveFormat::detect(b"<html>502</html>"), None);
    }

    #[test]
    fn test_extract_root_relative_tarball() {
        let temp_dir = TempDir::new().unwrap();
        let group_dir = temp_dir.path().join("artboy/CRUD");

        let archive = tar_gz(&[
            ("artboy/CRUD/1.0/controller/Controller.ftl", "controller body"),
            ("artboy/CRUD/1.0/README.md", "CRUD scaffolding"),
        ]);
        let written = extract_archive(&archive, &group_dir, "artboy", "CRUD").unwrap();

        assert_eq!(written, 2);
        assert_eq!(
            std::fs::read_to_string(group_dir.join("1.0/controller/Controller.ftl")).unwrap(),
            "controller body"
        );
        assert!(group_dir.join("1.0/README.md").exists());
    }

    #[test]
    fn test_extract_group_relative_zip() {
        let temp_dir = TempDir::new().unwrap();
        let group_dir = temp_dir.path().join("artboy/CRUD");

        let archive = zip(&[("1.0/service/Service.ftl", "service body")]);
        let written = extract_archive(&archive, &group_dir, "artboy", "CRUD").unwrap();

        assert_eq!(written, 1);
        assert!(group_dir.join("1.0/service/Service.ftl").exists());
    }

    #[test]
    fn test_manifest_entries_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let group_dir = temp_dir.path().join("artboy/CRUD");
        std::fs::create_dir_all(&group_dir).unwrap();
        std::fs::write(group_dir.join("meta.json"), "local manifest").unwrap();

        let archive = zip(&[
            ("artboy/CRUD/meta.json", "remote manifest"),
            ("artboy/CRUD/1.0/a.ftl", "a"),
        ]);
        let written = extract_archive(&archive, &group_dir, "artboy", "CRUD").unwrap();

        assert_eq!(written, 1);
        assert_eq!(
            std::fs::read_to_string(group_dir.join("meta.json")).unwrap(),
            "local manifest"
        );
    }

    #[test]
    fn test_escaping_entries_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let group_dir = temp_dir.path().join("repo/artboy/CRUD");

        let archive = zip(&[("../../../escape.txt", "nope"), ("1.0/ok.ftl", "ok")]);
        let written = extract_archive(&archive, &group_dir, "artboy", "CRUD").unwrap();

        assert_eq!(written, 1);
        assert!(!temp_dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_inflated_zip_size_does_not_preallocate() {
        let temp_dir = TempDir::new().unwrap();
        let group_dir = temp_dir.path().join("artboy/CRUD");

        let mut archive = stored_zip(&[("1.0/a.ftl", "small body")]);
        // Claim a ~2 GiB uncompressed size in the central directory
        let central = archive
            .windows(4)
            .position(|w| w == b"PK\x01\x02")
            .unwrap();
        archive[central + 24..central + 28].copy_from_slice(&0x7fff_ffffu32.to_le_bytes());

        match extract_archive(&archive, &group_dir, "artboy", "CRUD") {
            Ok(written) => {
                assert_eq!(written, 1);
                assert_eq!(
                    std::fs::read_to_string(group_dir.join("1.0/a.ftl")).unwrap(),
                    "small body"
                );
            }
            Err(e) => assert!(matches!(e, RepositoryError::ArchiveCorrupt { .. }), "{e}"),
        }
    }

    #[test]
    fn test_zip_extraction_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let group_dir = temp_dir.path().join("artboy/CRUD");

        let archive = zip(&[("1.0/a.ftl", "a"), ("1.0/b.ftl", "b")]);
        extract_archive(&archive, &group_dir, "artboy", "CRUD").unwrap();

        let mut names: Vec<String> = std::fs::read_dir(group_dir.join("1.0"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.ftl", "b.ftl"]);
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let err = extract_archive(b"not an archive", temp_dir.path(), "g", "a").unwrap_err();
        assert!(matches!(err, RepositoryError::ArchiveCorrupt { .. }));

        let err = extract_archive(b"PK\x03\x04garbage", temp_dir.path(), "g", "a").unwrap_err();
        assert!(matches!(err, RepositoryError::ArchiveCorrupt { .. }));
    }
}
