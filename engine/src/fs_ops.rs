//! Filesystem operations module.
//!
//! Low-level helpers behind the filesystem reader and writer:
//! - Converting `file://` URIs to paths and back
//! - Listing one directory level
//! - Writing a payload atomically, creating parent directories

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::EngineError;

/// Scheme of local filesystem URIs.
pub const FILE_SCHEME: &str = "file";

/// Convert a `file://` URI to a local path.
///
/// # Errors
/// Returns `EngineError::Validation` if the URI cannot be parsed, has another
/// scheme, or does not name a local path.
pub fn uri_to_path(uri: &str) -> Result<PathBuf, EngineError> {
    let url = Url::parse(uri)
        .map_err(|e| EngineError::Validation(format!("Malformed URI '{}': {}", uri, e)))?;

    if url.scheme() != FILE_SCHEME {
        return Err(EngineError::Validation(format!(
            "Expected a {}:// URI, got '{}'",
            FILE_SCHEME, uri
        )));
    }

    url.to_file_path()
        .map_err(|()| EngineError::Validation(format!("URI '{}' does not name a local path", uri)))
}

/// Render a local path as a `file://` URI.
///
/// Characters such as `#`, `?` and `%` are percent-encoded so the URI parses
/// back to the same path. Relative paths have no URI form and are rendered
/// verbatim.
pub fn path_to_uri(path: &Path) -> String {
    Url::from_file_path(path)
        .map(String::from)
        .unwrap_or_else(|()| format!("{}://{}", FILE_SCHEME, path.to_string_lossy()))
}

/// List the direct children of a directory, sorted by name.
///
/// A path naming a regular file lists to itself. Subdirectories are included
/// only when `files_only` is false; they are never descended into.
pub fn list_dir(path: &Path, files_only: bool) -> io::Result<Vec<PathBuf>> {
    let metadata = fs::metadata(path)?;
    if metadata.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_file() || !files_only {
            entries.push(entry.path());
        }
    }
    entries.sort();
    Ok(entries)
}

/// Write `data` to `dst`, creating parent directories as needed.
///
/// The payload goes to a hidden sibling first and is renamed into place, so a
/// failed write never leaves a truncated file at the destination.
///
/// # Returns
/// Number of bytes written
pub fn write_file_atomic(dst: &Path, data: &[u8]) -> io::Result<u64> {
    ensure_parent_dir_exists(dst)?;

    let file_name = dst
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name"))?;
    let mut part_name = std::ffi::OsString::from(".");
    part_name.push(file_name);
    part_name.push(".part");
    let part = dst.with_file_name(part_name);

    let result = (|| {
        let mut file = fs::File::create(&part)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&part, dst)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result.map(|()| data.len() as u64)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> io::Result<()> {
    match path.parent() {
        // Relative root: nothing to create
        Some(parent) if parent.as_os_str().is_empty() => Ok(()),
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_to_path_round_trip() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("file1.txt");

        let uri = path_to_uri(&path);
        assert!(uri.starts_with("file:///"));
        assert_eq!(uri_to_path(&uri).expect("Failed to parse uri"), path);
    }

    #[test]
    fn test_uri_round_trip_with_reserved_characters() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        for name in ["report#1.txt", "a%41.txt", "why?.txt", "with space.txt"] {
            let path = temp_dir.path().join(name);

            let uri = path_to_uri(&path);
            assert_eq!(uri_to_path(&uri).expect("Failed to parse uri"), path, "{}", uri);
        }
    }

    #[test]
    fn test_uri_to_path_rejects_other_schemes() {
        assert!(uri_to_path("s3://bucket/key").is_err());
        assert!(uri_to_path("not a uri").is_err());
    }

    #[test]
    fn test_list_dir_is_one_level_and_sorted() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("b.txt"), "b").expect("Failed to write b");
        fs::write(temp_dir.path().join("a.txt"), "a").expect("Failed to write a");
        fs::create_dir(temp_dir.path().join("sub")).expect("Failed to create sub");
        fs::write(temp_dir.path().join("sub").join("c.txt"), "c").expect("Failed to write c");

        let files = list_dir(temp_dir.path(), true).expect("Failed to list");
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        let all = list_dir(temp_dir.path(), false).expect("Failed to list");
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_list_dir_on_file_returns_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("only.txt");
        fs::write(&file, "x").expect("Failed to write file");

        assert_eq!(list_dir(&file, true).expect("Failed to list"), vec![file]);
    }

    #[test]
    fn test_write_file_atomic_creates_parents() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("nested").join("deeper").join("out.bin");

        let written = write_file_atomic(&dst, b"payload").expect("Failed to write");

        assert_eq!(written, 7);
        assert_eq!(fs::read(&dst).expect("Failed to read back"), b"payload");
        let leftovers: Vec<_> = fs::read_dir(dst.parent().unwrap())
            .expect("Failed to read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty(), "temporary file should be renamed away");
    }
}
