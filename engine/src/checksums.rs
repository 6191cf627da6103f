//! Checksum computation for payload integrity.
//!
//! The engine does not verify checksums locally: it computes a digest over
//! the payload it read and hands it to the destination, which recomputes it
//! and rejects the write on mismatch. Values are base64-encoded digests, the
//! encoding object stores expect in `x-amz-checksum-sha256` and `Content-MD5`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// MD5 (legacy `Content-MD5` integrity header)
    Md5,
}

impl Default for ChecksumAlgorithm {
    fn default() -> Self {
        ChecksumAlgorithm::Sha256
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Md5 => write!(f, "md5"),
        }
    }
}

impl ChecksumAlgorithm {
    /// Parse algorithm from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Some(Self::Sha256),
            "md5" => Some(Self::Md5),
            _ => None,
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    encoded: String,
}

impl ChecksumValue {
    pub fn new(algorithm: ChecksumAlgorithm, encoded: impl Into<String>) -> Self {
        ChecksumValue {
            algorithm,
            encoded: encoded.into(),
        }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// The base64-encoded digest
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Check whether `data` hashes to this value.
    pub fn matches(&self, data: &[u8]) -> bool {
        compute_checksum(data, self.algorithm) == *self
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

/// Compute the base64-encoded digest of a payload.
pub fn compute_checksum(data: &[u8], algorithm: ChecksumAlgorithm) -> ChecksumValue {
    let encoded = match algorithm {
        ChecksumAlgorithm::Sha256 => {
            use sha2::{Digest, Sha256};
            STANDARD.encode(Sha256::digest(data))
        }
        ChecksumAlgorithm::Md5 => STANDARD.encode(md5::compute(data).0),
    };
    ChecksumValue::new(algorithm, encoded)
}
