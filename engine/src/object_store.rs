//! Object-store destination.
//!
//! `ObjectStoreWriter` adapts any `ObjectClient` (the SDK-facing `put`
//! call) to the `Writer` contract: it splits `s3://bucket/key` URIs, hands
//! the checksum to the store and translates client errors into typed
//! remote failures. `MemoryObjectClient` is an in-process store honouring
//! the same integrity contract.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::{Authenticator, Credentials};
use crate::checksums::ChecksumValue;
use crate::error::{AuthenticationFailure, EngineError, RemoteFailure};
use crate::reader::Payload;
use crate::writer::Writer;

/// Scheme of object-store URIs.
pub const S3_SCHEME: &str = "s3";

/// Error codes an object store uses to reject a payload whose digest does not match.
const CHECKSUM_ERROR_CODES: &[&str] = &[
    "BadDigest",
    "InvalidDigest",
    "XAmzContentChecksumMismatch",
    "XAmzContentSHA256Mismatch",
];

/// Bucket and key of an `s3://bucket/key` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    /// Split an `s3://bucket/key` URI. The key is kept verbatim and may be
    /// empty or end with `/` when the URI names a prefix.
    pub fn parse(uri: &str) -> Result<Self, EngineError> {
        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| EngineError::Validation(format!("Expected an s3:// URI, got '{}'", uri)))?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(EngineError::Validation(format!("URI '{}' has no bucket", uri)));
        }
        Ok(S3Location {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

/// A single put call against an object store.
#[derive(Debug, Clone, Copy)]
pub struct PutRequest<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    pub body: &'a [u8],
    pub content_type: Option<&'a str>,
    pub checksum: Option<&'a ChecksumValue>,
}

/// Typed error returned by an object-store client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed ({code}): {message}")]
pub struct ClientError {
    pub code: String,
    pub message: String,
    pub operation: String,
}

impl ClientError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, operation: impl Into<String>) -> Self {
        ClientError {
            code: code.into(),
            message: message.into(),
            operation: operation.into(),
        }
    }

    pub fn is_checksum_mismatch(&self) -> bool {
        CHECKSUM_ERROR_CODES.contains(&self.code.as_str())
    }
}

impl From<ClientError> for RemoteFailure {
    fn from(err: ClientError) -> Self {
        if err.is_checksum_mismatch() {
            RemoteFailure::checksum(err.message, err.operation)
        } else {
            RemoteFailure::transfer(err.message, err.operation)
        }
    }
}

/// The SDK-facing side of an object store.
pub trait ObjectClient: Send + Sync {
    fn put(&self, request: PutRequest<'_>) -> Result<(), ClientError>;

    /// Install freshly issued credentials. Clients with ambient credentials ignore this.
    fn set_credentials(&mut self, _credentials: Credentials) {}
}

/// Writer for `s3://` destinations.
pub struct ObjectStoreWriter<C: ObjectClient> {
    client: C,
    authenticator: Option<Box<dyn Authenticator>>,
}

impl<C: ObjectClient> ObjectStoreWriter<C> {
    pub fn new(client: C) -> Self {
        ObjectStoreWriter {
            client,
            authenticator: None,
        }
    }

    /// Refresh the client's credentials from `authenticator` before every run.
    pub fn with_authenticator(mut self, authenticator: Box<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C: ObjectClient> Writer for ObjectStoreWriter<C> {
    fn send(
        &self,
        payload: &Payload,
        uri: &str,
        checksum: Option<&ChecksumValue>,
    ) -> Result<(), RemoteFailure> {
        let location =
            S3Location::parse(uri).map_err(|e| RemoteFailure::transfer(e.to_string(), "PutObject"))?;
        if location.key.is_empty() || location.key.ends_with('/') {
            return Err(RemoteFailure::transfer(
                format!("'{}' names a prefix, not an object", uri),
                "PutObject",
            ));
        }

        self.client.put(PutRequest {
            bucket: &location.bucket,
            key: &location.key,
            body: &payload.bytes,
            content_type: payload.content_type.as_deref(),
            checksum,
        })?;
        debug!(bucket = %location.bucket, key = %location.key, bytes = payload.len(), "put object");
        Ok(())
    }

    fn refresh_credentials(&mut self) -> Result<(), AuthenticationFailure> {
        if let Some(authenticator) = &self.authenticator {
            let credentials = authenticator.credentials()?;
            info!(access_key_id = %credentials.access_key_id, "refreshed object store credentials");
            self.client.set_credentials(credentials);
        }
        Ok(())
    }
}

/// A stored object in a `MemoryObjectClient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub checksum: Option<ChecksumValue>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<(String, String), StoredObject>,
    credentials: Option<Credentials>,
}

/// In-process object store.
///
/// Clones share the same state, so a caller can keep a handle for
/// inspection after moving one into a writer. When built with
/// `requiring_credentials`, puts fail with `InvalidAccessKeyId` until
/// credentials have been installed.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectClient {
    state: Arc<Mutex<MemoryState>>,
    require_credentials: bool,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requiring_credentials() -> Self {
        MemoryObjectClient {
            state: Arc::default(),
            require_credentials: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide the objects from the rest of the test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.lock().credentials.clone()
    }
}

impl ObjectClient for MemoryObjectClient {
    fn put(&self, request: PutRequest<'_>) -> Result<(), ClientError> {
        let mut state = self.lock();
        if self.require_credentials && state.credentials.is_none() {
            return Err(ClientError::new(
                "InvalidAccessKeyId",
                "No credentials were supplied",
                "PutObject",
            ));
        }
        if let Some(expected) = request.checksum {
            if !expected.matches(request.body) {
                return Err(ClientError::new(
                    "BadDigest",
                    format!(
                        "The {} you specified did not match the calculated checksum.",
                        expected.algorithm()
                    ),
                    "PutObject",
                ));
            }
        }
        state.objects.insert(
            (request.bucket.to_string(), request.key.to_string()),
            StoredObject {
                body: request.body.to_vec(),
                content_type: request.content_type.map(str::to_string),
                checksum: request.checksum.cloned(),
            },
        );
        Ok(())
    }

    fn set_credentials(&mut self, credentials: Credentials) {
        self.lock().credentials = Some(credentials);
    }
}
