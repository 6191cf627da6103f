//! # Forward Engine - Resumable File Forwarding Library
//!
//! A headless engine that forwards files from a source location to a
//! destination (local directory or object store), recording every file as
//! an item so an interrupted or failed job can be resumed without sending
//! anything twice.
//!
//! ## Overview
//!
//! - Jobs are validated and recorded before any data moves
//! - Sources are enumerated once into per-file items
//! - Transfers run sequentially or on a bounded worker pool, batch by batch
//! - Destinations verify a SHA-256 (or MD5) checksum of every payload
//! - Failures are aggregated on the job by severity
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{
//!     Courier, FileSystemReader, JobManager, JsonStore, MemoryObjectClient, ObjectStoreWriter,
//!     Pattern, TransferAgent,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let courier = Courier::new(
//!     Box::new(FileSystemReader::new()),
//!     Box::new(ObjectStoreWriter::new(MemoryObjectClient::new())),
//! );
//! let agent = TransferAgent::new(courier, 4, 0.1)?;
//! let mut manager = JobManager::new(JsonStore::open("/tmp/forward.json")?, agent);
//!
//! let job = manager.init("file:///data/images", "s3://bucket/images/", Pattern::Glob("*.jpg".into()))?;
//! manager.run(job.id)?;
//!
//! let summary = manager.job_summary(job.id)?;
//! println!("{}: {}/{} transferred", summary.job.status, summary.transferred, summary.total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Jobs, items, transactions and their status enums
//! - **error**: Error types and handling
//! - **config**: Engine configuration
//! - **store**: Persistence of jobs and items
//! - **reader** / **writer** / **object_store**: Source and destination backends
//! - **auth**: Credential providers
//! - **transfer**: The single-file transfer primitive
//! - **commands**: Post-transfer commands that persist outcomes
//! - **agent**: Sequential and batched concurrent execution
//! - **job**: Job lifecycle (init, parse, run, resume, delete)
//! - **progress**: Progress callback trait

pub mod agent;
pub mod auth;
pub mod checksums;
pub mod commands;
pub mod config;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod object_store;
pub mod pattern;
pub mod progress;
pub mod reader;
pub mod store;
pub mod transfer;
pub mod writer;

// Re-export main types
pub use agent::{split_into_batches, RunSummary, TransferAgent};
pub use auth::{Authenticator, Credentials, EnvCredentials, StaticCredentials};
pub use checksums::{compute_checksum, ChecksumAlgorithm, ChecksumValue};
pub use commands::{CommandSet, JobContext, PostBatch, PostTransaction};
pub use config::EngineConfig;
pub use error::{AuthenticationFailure, EngineError, RemoteFailure, RemoteFailureKind, StoreError};
pub use job::{JobManager, JobSummary};
pub use model::{
    ErrorInfo, Item, ItemId, ItemStatus, Job, JobError, JobId, JobStatus, Outcome, Pattern, Transaction,
};
pub use object_store::{
    ClientError, MemoryObjectClient, ObjectClient, ObjectStoreWriter, PutRequest, S3Location,
};
pub use progress::ProgressCallback;
pub use reader::{FileSystemReader, Payload, Reader};
pub use store::{ItemQuery, JobQuery, JsonStore, MemoryStore, Store};
pub use transfer::Courier;
pub use writer::{FileSystemWriter, Writer};
