//! Core data model for forwarding jobs.
//!
//! This module defines the records the engine persists and the ephemeral
//! unit of work it executes:
//! - Job: one migration task from a source location to a destination
//! - Item: a single file within a job
//! - Transaction: one transfer attempt derived from an Item
//! - JobStatus, ItemStatus, JobError, Pattern: enums controlling behavior

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::RemoteFailure;

/// Identifier of a persisted job.
pub type JobId = Uuid;

/// Identifier of a persisted item.
pub type ItemId = Uuid;

/// A single forwarding job.
///
/// A Job exclusively owns its Items: deleting the job deletes them.
/// `error != JobError::None` implies `status != JobStatus::Done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job
    pub id: JobId,

    /// Current lifecycle state
    pub status: JobStatus,

    /// Highest-severity error recorded during the last run
    pub error: JobError,

    /// Message and operation of the recorded error
    pub info: Option<ErrorInfo>,

    /// Source location URI (e.g. `file:///data/in/`)
    pub source: String,

    /// Destination location URI (e.g. `s3://bucket/prefix/`)
    pub destination: String,

    /// Inclusion pattern applied to source entries
    pub pattern: Pattern,

    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, pattern: Pattern) -> Self {
        Job {
            id: Uuid::new_v4(),
            status: JobStatus::Initiated,
            error: JobError::None,
            info: None,
            source: source.into(),
            destination: destination.into(),
            pattern,
            created_at: Utc::now(),
        }
    }

    /// Clear the recorded error before a new attempt.
    pub fn clear_error(&mut self) {
        self.error = JobError::None;
        self.info = None;
    }

    /// Raise the job error to `error` if it is more severe than the current one.
    ///
    /// The info is replaced whenever the new error is at least as severe, so it
    /// always describes a failure of the recorded kind.
    pub fn escalate(&mut self, error: JobError, info: ErrorInfo) {
        if error >= self.error {
            self.error = error;
            self.info = Some(info);
        }
    }
}

/// Structured detail of a job error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable message from the failing backend
    pub message: String,
    /// Name of the remote operation that failed
    pub operation: String,
}

/// A single file to transfer within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Unique identifier for this item
    pub id: ItemId,

    /// Owning job
    pub job_id: JobId,

    /// Full input URI
    pub input: String,

    /// Full output URI
    pub output: String,

    /// Current state of this item
    pub status: ItemStatus,

    /// When the item was parsed
    pub created_at: DateTime<Utc>,

    /// When the item was successfully transferred
    pub transferred_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(job_id: JobId, input: impl Into<String>, output: impl Into<String>) -> Self {
        Item {
            id: Uuid::new_v4(),
            job_id,
            input: input.into(),
            output: output.into(),
            status: ItemStatus::Pending,
            created_at: Utc::now(),
            transferred_at: None,
        }
    }

    /// Mark this item as transferred now.
    ///
    /// The timestamp is clamped so it never precedes `created_at`.
    pub fn mark_transferred(&mut self) {
        let now = Utc::now().max(self.created_at);
        self.status = ItemStatus::Transferred;
        self.transferred_at = Some(now);
    }
}

/// The state of an individual item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    /// Not yet transferred
    Pending,
    /// Successfully written to the destination
    Transferred,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "PENDING"),
            ItemStatus::Transferred => write!(f, "TRANSFERRED"),
        }
    }
}

impl ItemStatus {
    /// Parse a status name, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "TRANSFERRED" => Some(Self::Transferred),
            _ => None,
        }
    }
}

/// The lifecycle state of a job.
///
/// States are ordered; a job only moves forward except when `resume`
/// re-enters `Transferring` from a non-`Done` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Initiated,
    Parsing,
    Parsed,
    Transferring,
    Done,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Initiated => "INITIATED",
            JobStatus::Parsing => "PARSING",
            JobStatus::Parsed => "PARSED",
            JobStatus::Transferring => "TRANSFERRING",
            JobStatus::Done => "DONE",
        };
        write!(f, "{}", name)
    }
}

impl JobStatus {
    /// Parse a status name, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "INITIATED" => Some(Self::Initiated),
            "PARSING" => Some(Self::Parsing),
            "PARSED" => Some(Self::Parsed),
            "TRANSFERRING" => Some(Self::Transferring),
            "DONE" => Some(Self::Done),
            _ => None,
        }
    }
}

/// Persisted job error kind.
///
/// Variants are declared in severity order so the derived `Ord` gives the
/// highest-severity-wins aggregation used across concurrent failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobError {
    None,
    TransferError,
    ChecksumError,
    AuthError,
}

impl Default for JobError {
    fn default() -> Self {
        JobError::None
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobError::None => "NONE",
            JobError::TransferError => "TRANSFER_ERROR",
            JobError::ChecksumError => "CHECKSUM_ERROR",
            JobError::AuthError => "AUTH_ERROR",
        };
        write!(f, "{}", name)
    }
}

impl JobError {
    /// Parse an error kind name, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NONE" => Some(Self::None),
            "TRANSFER_ERROR" => Some(Self::TransferError),
            "CHECKSUM_ERROR" => Some(Self::ChecksumError),
            "AUTH_ERROR" => Some(Self::AuthError),
            _ => None,
        }
    }
}

/// Inclusion pattern for source entries.
///
/// Patterns are matched against the entry's file name, not the full URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Pattern {
    /// Shell-style glob (`*.tif`)
    Glob(String),
    /// Regular expression, anchored at the start of the name (`^.*\.jpg$`)
    Regex(String),
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern::Regex(".*".to_string())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Glob(p) => write!(f, "glob:{}", p),
            Pattern::Regex(p) => write!(f, "regex:{}", p),
        }
    }
}

/// One transfer attempt derived from an Item.
///
/// Transactions live for a single run of the transfer agent; commands
/// translate their outcome into Item and Job mutations.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub item_id: ItemId,
    pub input: String,
    pub output: String,
    pub outcome: Outcome,
}

impl Transaction {
    pub fn new(item_id: ItemId, input: impl Into<String>, output: impl Into<String>) -> Self {
        Transaction {
            item_id,
            input: input.into(),
            output: output.into(),
            outcome: Outcome::Unset,
        }
    }

    pub fn from_item(item: &Item) -> Self {
        Self::new(item.id, item.input.clone(), item.output.clone())
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }

    pub fn failure(&self) -> Option<&RemoteFailure> {
        match &self.outcome {
            Outcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Result of a transaction's transfer attempt.
#[derive(Debug, Clone, Default)]
pub enum Outcome {
    /// Not attempted yet
    #[default]
    Unset,
    Success,
    Failed(RemoteFailure),
}

impl From<Result<(), RemoteFailure>> for Outcome {
    fn from(result: Result<(), RemoteFailure>) -> Self {
        match result {
            Ok(()) => Outcome::Success,
            Err(failure) => Outcome::Failed(failure),
        }
    }
}
