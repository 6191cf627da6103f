//! Source side of a transfer.
//!
//! A `Reader` fetches payloads, lists entries under a location and checks
//! existence. One instance is shared by reference across transfer workers.

use std::io;
use tracing::debug;

use crate::error::{AuthenticationFailure, EngineError};
use crate::fs_ops;

/// Bytes read from a source together with a content-type hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl Payload {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Payload {
            bytes,
            content_type,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Guess a MIME type from the name at the end of a URI.
pub fn guess_content_type(uri: &str) -> Option<String> {
    mime_guess::from_path(uri).first().map(|m| m.essence_str().to_string())
}

/// Capability set of a source backend.
pub trait Reader: Send + Sync {
    /// Fetch the bytes at `uri`.
    ///
    /// # Errors
    /// `EngineError::NotFound` if the location does not exist.
    fn read(&self, uri: &str) -> Result<Payload, EngineError>;

    /// Whether `uri` exists. Never fails; unreadable locations are reported as absent.
    fn exists(&self, uri: &str) -> bool;

    /// URIs of the direct children of `uri`, one level deep.
    fn list(&self, uri: &str, files_only: bool) -> Result<Vec<String>, EngineError>;

    /// Refresh rotating credentials. Called once before every run.
    fn refresh_credentials(&mut self) -> Result<(), AuthenticationFailure> {
        Ok(())
    }
}

/// Reader over the local filesystem (`file://` URIs).
#[derive(Debug, Default, Clone)]
pub struct FileSystemReader;

impl FileSystemReader {
    pub fn new() -> Self {
        FileSystemReader
    }
}

impl Reader for FileSystemReader {
    fn read(&self, uri: &str) -> Result<Payload, EngineError> {
        let path = fs_ops::uri_to_path(uri)?;
        let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => EngineError::NotFound {
                uri: uri.to_string(),
            },
            _ => EngineError::Validation(format!("Cannot read {}: {}", path.display(), e)),
        })?;
        debug!(uri, bytes = bytes.len(), "read source file");
        Ok(Payload::new(bytes, guess_content_type(uri)))
    }

    fn exists(&self, uri: &str) -> bool {
        fs_ops::uri_to_path(uri)
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    fn list(&self, uri: &str, files_only: bool) -> Result<Vec<String>, EngineError> {
        let path = fs_ops::uri_to_path(uri)?;
        let entries = fs_ops::list_dir(&path, files_only).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => EngineError::NotFound {
                uri: uri.to_string(),
            },
            _ => EngineError::InitSource {
                message: format!("Failed to enumerate {}: {}", path.display(), e),
            },
        })?;
        Ok(entries.iter().map(|p| fs_ops::path_to_uri(p)).collect())
    }
}
