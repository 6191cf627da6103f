//! The single-file transfer primitive.

use tracing::debug;

use crate::checksums::{compute_checksum, ChecksumAlgorithm};
use crate::error::{AuthenticationFailure, EngineError, RemoteFailure};
use crate::reader::Reader;
use crate::writer::Writer;

/// Pairs one Reader with one Writer and moves a single file between them.
///
/// Shared by reference across transfer workers; credentials can only be
/// refreshed through `&mut`, i.e. while no worker holds it.
pub struct Courier {
    reader: Box<dyn Reader>,
    writer: Box<dyn Writer>,
    checksum: Option<ChecksumAlgorithm>,
}

impl Courier {
    pub fn new(reader: Box<dyn Reader>, writer: Box<dyn Writer>) -> Self {
        Courier {
            reader,
            writer,
            checksum: Some(ChecksumAlgorithm::Sha256),
        }
    }

    /// Choose the digest handed to the destination; `None` disables checksumming.
    pub fn with_checksum(mut self, checksum: Option<ChecksumAlgorithm>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn reader(&self) -> &dyn Reader {
        self.reader.as_ref()
    }

    pub fn checksum(&self) -> Option<ChecksumAlgorithm> {
        self.checksum
    }

    /// Read `input`, checksum it and write it to `output`.
    ///
    /// The checksum is not verified here; the destination recomputes it and
    /// rejects the write on mismatch.
    pub fn send(&self, input: &str, output: &str) -> Result<(), RemoteFailure> {
        debug!(input, output, "sending");
        let payload = self.reader.read(input).map_err(|e| match e {
            EngineError::Remote(failure) => failure,
            other => RemoteFailure::transfer(other.to_string(), "Read"),
        })?;

        let checksum = self
            .checksum
            .map(|algorithm| compute_checksum(&payload.bytes, algorithm));

        self.writer.send(&payload, output, checksum.as_ref())
    }

    /// Refresh reader then writer credentials.
    pub fn refresh_credentials(&mut self) -> Result<(), AuthenticationFailure> {
        self.reader.refresh_credentials()?;
        self.writer.refresh_credentials()
    }
}
