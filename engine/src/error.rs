//! Error types for the forwarding engine.
//!
//! The primary error type is `EngineError`, returned by job-level operations.
//! Per-transfer failures are `RemoteFailure` values carried on a Transaction;
//! they only become an `EngineError` when a command raises them after a batch.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::model::JobError;

/// Errors returned by job-level operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Source location is missing or enumerates to zero matching entries
    #[error("Source error: {message}")]
    InitSource { message: String },

    /// A job with the same source and destination already exists
    #[error("Found duplicate job (id: {existing}) with source {source_uri} and destination {destination}")]
    InitDuplicateJob {
        existing: Uuid,
        source_uri: String,
        destination: String,
    },

    /// Malformed source/destination URI or pattern
    #[error("Validation error: {0}")]
    Validation(String),

    /// Credentials could not be obtained
    #[error(transparent)]
    Authentication(#[from] AuthenticationFailure),

    /// A transfer failed at the destination
    #[error(transparent)]
    Remote(#[from] RemoteFailure),

    /// A reader location does not exist
    #[error("Not found: {uri}")]
    NotFound { uri: String },

    /// No job with this identifier
    #[error("Job not found: {id}")]
    JobNotFound { id: Uuid },

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which kind of remote failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFailureKind {
    /// The write itself failed
    Transfer,
    /// The destination rejected the payload's checksum
    Checksum,
}

/// A failure reported by a storage backend during a send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?} failure during {operation}: {message}")]
pub struct RemoteFailure {
    pub kind: RemoteFailureKind,
    pub message: String,
    pub operation: String,
}

impl RemoteFailure {
    pub fn transfer(message: impl Into<String>, operation: impl Into<String>) -> Self {
        RemoteFailure {
            kind: RemoteFailureKind::Transfer,
            message: message.into(),
            operation: operation.into(),
        }
    }

    pub fn checksum(message: impl Into<String>, operation: impl Into<String>) -> Self {
        RemoteFailure {
            kind: RemoteFailureKind::Checksum,
            message: message.into(),
            operation: operation.into(),
        }
    }

    /// Severity of this failure when aggregated onto a job.
    pub fn job_error(&self) -> JobError {
        match self.kind {
            RemoteFailureKind::Transfer => JobError::TransferError,
            RemoteFailureKind::Checksum => JobError::ChecksumError,
        }
    }
}

/// Credentials could not be produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Authentication failed during {operation}: {message}")]
pub struct AuthenticationFailure {
    pub message: String,
    pub operation: String,
}

impl AuthenticationFailure {
    pub fn new(message: impl Into<String>, operation: impl Into<String>) -> Self {
        AuthenticationFailure {
            message: message.into(),
            operation: operation.into(),
        }
    }
}

/// Errors from a persistence backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt store {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("No {entity} with id {id}")]
    Missing { entity: &'static str, id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_failure_maps_to_job_error() {
        let transfer = RemoteFailure::transfer("connection reset", "PutObject");
        let checksum = RemoteFailure::checksum("digest mismatch", "PutObject");

        assert_eq!(transfer.job_error(), JobError::TransferError);
        assert_eq!(checksum.job_error(), JobError::ChecksumError);
    }

    #[test]
    fn test_display_includes_operation() {
        let err = EngineError::from(AuthenticationFailure::new("token expired", "login"));
        let text = err.to_string();
        assert!(text.contains("login"));
        assert!(text.contains("token expired"));
    }
}
