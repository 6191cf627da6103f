//! Destination side of a transfer.
//!
//! A `Writer` persists a payload at a destination URI. When a checksum is
//! supplied the destination is responsible for verifying it and rejects the
//! write with a `Checksum` failure on mismatch.

use tracing::debug;

use crate::checksums::ChecksumValue;
use crate::error::{AuthenticationFailure, RemoteFailure};
use crate::fs_ops;
use crate::reader::Payload;

/// Capability set of a destination backend.
pub trait Writer: Send + Sync {
    /// Persist `payload` at `uri`.
    fn send(
        &self,
        payload: &Payload,
        uri: &str,
        checksum: Option<&ChecksumValue>,
    ) -> Result<(), RemoteFailure>;

    /// Refresh rotating credentials. Called once before every run.
    fn refresh_credentials(&mut self) -> Result<(), AuthenticationFailure> {
        Ok(())
    }
}

/// Writer onto the local filesystem (`file://` destinations).
#[derive(Debug, Default, Clone)]
pub struct FileSystemWriter;

impl FileSystemWriter {
    const OPERATION: &'static str = "WriteFile";

    pub fn new() -> Self {
        FileSystemWriter
    }
}

impl Writer for FileSystemWriter {
    fn send(
        &self,
        payload: &Payload,
        uri: &str,
        checksum: Option<&ChecksumValue>,
    ) -> Result<(), RemoteFailure> {
        let path = fs_ops::uri_to_path(uri)
            .map_err(|e| RemoteFailure::transfer(e.to_string(), Self::OPERATION))?;

        if let Some(expected) = checksum {
            if !expected.matches(&payload.bytes) {
                return Err(RemoteFailure::checksum(
                    format!("The {} you specified did not match the calculated checksum", expected.algorithm()),
                    Self::OPERATION,
                ));
            }
        }

        let written = fs_ops::write_file_atomic(&path, &payload.bytes).map_err(|e| {
            RemoteFailure::transfer(format!("{}: {}", path.display(), e), Self::OPERATION)
        })?;
        debug!(uri, bytes = written, "wrote destination file");
        Ok(())
    }
}
