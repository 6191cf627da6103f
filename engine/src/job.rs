//! Job orchestration module.
//!
//! `JobManager` owns the store and the transfer agent and drives a job
//! through its lifecycle:
//! - `init` validates and records a job
//! - `parse_and_commit_items` enumerates the source into items
//! - `run` transfers every item not yet transferred
//! - `resume` clears a failed job's error and runs it again

use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::agent::{RunSummary, TransferAgent};
use crate::commands::{CommandSet, JobContext};
use crate::error::EngineError;
use crate::fs_ops::FILE_SCHEME;
use crate::model::{ErrorInfo, Item, ItemStatus, Job, JobError, JobId, JobStatus, Pattern, Transaction};
use crate::object_store::{S3Location, S3_SCHEME};
use crate::pattern::{file_name, PatternMatcher};
use crate::progress::ProgressCallback;
use crate::store::{ItemQuery, JobQuery, Store};

/// Item counts for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub job: Job,
    pub total: usize,
    pub transferred: usize,
    pub pending: usize,
}

/// Output location for `input` under `destination`.
///
/// A destination ending in `/` is a prefix and receives the input's file
/// name; anything else is used verbatim. The name is percent-encoded under a
/// `file://` prefix and appended as-is to an object-store prefix.
pub fn output_uri(destination: &str, input: &str) -> String {
    if !destination.ends_with('/') {
        return destination.to_string();
    }
    let name = file_name(input);
    if let Ok(mut url) = Url::parse(destination) {
        if url.scheme() == FILE_SCHEME {
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.pop_if_empty().push(&name);
            }
            return url.into();
        }
    }
    format!("{}{}", destination, name)
}

/// Check that `source` and `destination` are URIs this engine can serve.
pub fn validate_uris(source: &str, destination: &str) -> Result<(), EngineError> {
    let parsed = Url::parse(source)
        .map_err(|e| EngineError::Validation(format!("Invalid source '{}': {}", source, e)))?;
    if parsed.scheme() != FILE_SCHEME {
        return Err(EngineError::Validation(format!(
            "Unsupported source scheme '{}' in '{}'",
            parsed.scheme(),
            source
        )));
    }

    let parsed = Url::parse(destination)
        .map_err(|e| EngineError::Validation(format!("Invalid destination '{}': {}", destination, e)))?;
    match parsed.scheme() {
        FILE_SCHEME => Ok(()),
        S3_SCHEME => {
            let location = S3Location::parse(destination)?;
            if location.key.is_empty() {
                return Err(EngineError::Validation(format!(
                    "Destination '{}' must name a key or a prefix",
                    destination
                )));
            }
            Ok(())
        }
        other => Err(EngineError::Validation(format!(
            "Unsupported destination scheme '{}' in '{}'",
            other, destination
        ))),
    }
}

/// Drives jobs through init, parse and transfer against one store.
pub struct JobManager<S: Store> {
    store: S,
    agent: TransferAgent,
    progress: Option<Box<dyn ProgressCallback>>,
}

impl<S: Store> JobManager<S> {
    pub fn new(store: S, agent: TransferAgent) -> Self {
        JobManager {
            store,
            agent,
            progress: None,
        }
    }

    /// Report run progress to `progress`.
    pub fn with_progress(mut self, progress: Box<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn agent(&self) -> &TransferAgent {
        &self.agent
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Validate and record a new job.
    ///
    /// Nothing is persisted unless every check passes.
    ///
    /// # Errors
    /// - `Validation` for malformed URIs or patterns, or a literal
    ///   destination that would receive more than one file
    /// - `InitSource` if the source is missing or nothing in it matches
    /// - `InitDuplicateJob` if a job with the same source and destination exists
    pub fn init(&mut self, source: &str, destination: &str, pattern: Pattern) -> Result<Job, EngineError> {
        validate_uris(source, destination)?;
        let matcher = PatternMatcher::compile(&pattern)?;

        if !self.agent.courier().reader().exists(source) {
            return Err(EngineError::InitSource {
                message: format!("Source {} does not exist", source),
            });
        }

        let inputs = self.matching_inputs(source, &matcher)?;
        if inputs.is_empty() {
            return Err(EngineError::InitSource {
                message: format!("No files in {} match {}", source, pattern),
            });
        }
        check_cardinality(destination, inputs.len())?;

        let duplicates = self.store.jobs(&JobQuery {
            source: Some(source.to_string()),
            destination: Some(destination.to_string()),
            ..JobQuery::default()
        })?;
        if let Some(existing) = duplicates.first() {
            return Err(EngineError::InitDuplicateJob {
                existing: existing.id,
                source_uri: source.to_string(),
                destination: destination.to_string(),
            });
        }

        let job = Job::new(source, destination, pattern);
        self.store.insert_job(&job)?;
        info!(job_id = %job.id, source, destination, files = inputs.len(), "job initiated");
        Ok(job)
    }

    /// Enumerate the job's source and record one item per matching file.
    ///
    /// Returns the number of items created. Does nothing once the job is
    /// PARSED; inputs recorded by an interrupted parse are not duplicated.
    pub fn parse_and_commit_items(&mut self, id: JobId) -> Result<usize, EngineError> {
        let mut job = self.job(id)?;
        if job.status >= JobStatus::Parsed {
            debug!(job_id = %id, status = %job.status, "already parsed");
            return Ok(0);
        }

        job.status = JobStatus::Parsing;
        self.store.update_job(&job)?;

        let matcher = PatternMatcher::compile(&job.pattern)?;
        let inputs = self.matching_inputs(&job.source, &matcher)?;
        check_cardinality(&job.destination, inputs.len())?;

        let recorded: HashSet<String> = self
            .store
            .items(&ItemQuery::for_job(id))?
            .into_iter()
            .map(|item| item.input)
            .collect();
        let items: Vec<Item> = inputs
            .iter()
            .filter(|input| !recorded.contains(*input))
            .map(|input| Item::new(id, input.as_str(), output_uri(&job.destination, input)))
            .collect();
        if !items.is_empty() {
            self.store.insert_items(&items)?;
        }

        job.status = JobStatus::Parsed;
        self.store.update_job(&job)?;
        info!(job_id = %id, created = items.len(), skipped = recorded.len(), "job parsed");
        Ok(items.len())
    }

    /// Transfer every pending item of the job.
    ///
    /// On failure the job keeps the recorded error, stays TRANSFERRING and
    /// the error is returned. Items already transferred are never re-sent.
    pub fn run(&mut self, id: JobId) -> Result<RunSummary, EngineError> {
        let mut job = self.job(id)?;
        if job.status == JobStatus::Done {
            info!(job_id = %id, "job already done");
            return Ok(RunSummary::default());
        }
        if job.status < JobStatus::Parsed {
            self.parse_and_commit_items(id)?;
            job = self.job(id)?;
        }

        if let Err(failure) = self.agent.refresh_credentials() {
            warn!(job_id = %id, operation = %failure.operation, "authentication failed: {}", failure.message);
            job.escalate(
                JobError::AuthError,
                ErrorInfo {
                    message: failure.message.clone(),
                    operation: failure.operation.clone(),
                },
            );
            self.store.update_job(&job)?;
            return Err(failure.into());
        }

        // Errors from an earlier attempt no longer describe this run.
        job.clear_error();
        job.status = JobStatus::Transferring;
        self.store.update_job(&job)?;

        let transactions: Vec<Transaction> = self
            .store
            .items(&ItemQuery::for_job(id))?
            .iter()
            .filter(|item| item.status != ItemStatus::Transferred)
            .map(Transaction::from_item)
            .collect();
        info!(job_id = %id, pending = transactions.len(), workers = self.agent.workers(), "job transferring");

        let progress = self.progress.as_deref();
        if let Some(callback) = progress {
            callback.on_run_started(&job, transactions.len());
        }

        let mut commands = CommandSet::for_workers(self.agent.workers());
        let result = {
            let mut ctx = JobContext::new(&mut self.store, &mut job);
            self.agent.run(transactions, &mut ctx, &mut commands, progress)
        };

        match result {
            Ok(summary) => {
                job.status = JobStatus::Done;
                self.store.update_job(&job)?;
                if let Some(callback) = progress {
                    callback.on_run_completed(&job);
                }
                info!(
                    job_id = %id,
                    transferred = summary.transferred,
                    batches = summary.batches,
                    "job done"
                );
                Ok(summary)
            }
            Err(e) => {
                warn!(job_id = %id, error = %job.error, "job stopped: {}", e);
                Err(e)
            }
        }
    }

    /// Clear the job's error and run it again. A DONE job is left untouched.
    pub fn resume(&mut self, id: JobId) -> Result<RunSummary, EngineError> {
        let mut job = self.job(id)?;
        if job.status == JobStatus::Done {
            info!(job_id = %id, "job is already complete");
            return Ok(RunSummary::default());
        }

        job.clear_error();
        self.store.update_job(&job)?;
        info!(job_id = %id, status = %job.status, "resuming job");
        self.run(id)
    }

    /// Remove the job and all of its items.
    pub fn delete(&mut self, id: JobId) -> Result<(), EngineError> {
        if !self.store.delete_job(id)? {
            return Err(EngineError::JobNotFound { id });
        }
        info!(job_id = %id, "job deleted");
        Ok(())
    }

    pub fn job(&self, id: JobId) -> Result<Job, EngineError> {
        self.store.job(id)?.ok_or(EngineError::JobNotFound { id })
    }

    pub fn jobs(&self, query: &JobQuery) -> Result<Vec<Job>, EngineError> {
        Ok(self.store.jobs(query)?)
    }

    pub fn items(&self, query: &ItemQuery) -> Result<Vec<Item>, EngineError> {
        Ok(self.store.items(query)?)
    }

    pub fn job_summary(&self, id: JobId) -> Result<JobSummary, EngineError> {
        let job = self.job(id)?;
        let items = self.store.items(&ItemQuery::for_job(id))?;
        let transferred = items
            .iter()
            .filter(|item| item.status == ItemStatus::Transferred)
            .count();
        Ok(JobSummary {
            job,
            total: items.len(),
            transferred,
            pending: items.len() - transferred,
        })
    }

    /// Files directly under `source` whose names match.
    fn matching_inputs(&self, source: &str, matcher: &PatternMatcher) -> Result<Vec<String>, EngineError> {
        let listed = self
            .agent
            .courier()
            .reader()
            .list(source, true)
            .map_err(|e| match e {
                EngineError::NotFound { uri } => EngineError::InitSource {
                    message: format!("Source {} does not exist", uri),
                },
                other => other,
            })?;
        Ok(listed.into_iter().filter(|uri| matcher.matches(uri)).collect())
    }
}

/// A literal destination can only receive a single file.
fn check_cardinality(destination: &str, matches: usize) -> Result<(), EngineError> {
    if !destination.ends_with('/') && matches > 1 {
        return Err(EngineError::Validation(format!(
            "Destination {} names a single object but {} files match; end it with '/' to use it as a prefix",
            destination, matches
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use crate::auth::Credentials;
    use crate::error::AuthenticationFailure;
    use crate::fs_ops::path_to_uri;
    use crate::object_store::{MemoryObjectClient, ObjectStoreWriter};
    use crate::reader::FileSystemReader;
    use crate::store::MemoryStore;
    use crate::transfer::Courier;
    use std::fs;
    use std::path::Path;

    fn manager(client: &MemoryObjectClient, workers: usize) -> JobManager<MemoryStore> {
        let courier = Courier::new(
            Box::new(FileSystemReader::new()),
            Box::new(ObjectStoreWriter::new(client.clone())),
        );
        let agent = TransferAgent::new(courier, workers, 0.5).expect("valid agent");
        JobManager::new(MemoryStore::new(), agent)
    }

    fn source_dir(root: &Path, names: &[&str]) -> String {
        let src = root.join("src");
        fs::create_dir(&src).expect("Failed to create src dir");
        for name in names {
            fs::write(src.join(name), format!("content of {name}")).expect("Failed to write file");
        }
        path_to_uri(&src)
    }

    #[test]
    fn test_output_uri_naming() {
        assert_eq!(output_uri("s3://b/p/", "file:///d/a.txt"), "s3://b/p/a.txt");
        assert_eq!(output_uri("s3://b/p/renamed.txt", "file:///d/a.txt"), "s3://b/p/renamed.txt");
        assert_eq!(output_uri("file:///backup/", "file:///d/a.txt"), "file:///backup/a.txt");
    }

    #[test]
    fn test_output_uri_with_escaped_names() {
        assert_eq!(
            output_uri("s3://b/p/", "file:///d/report%231.txt"),
            "s3://b/p/report#1.txt"
        );
        assert_eq!(
            output_uri("file:///backup/", "file:///d/report%231.txt"),
            "file:///backup/report%231.txt"
        );
        assert_eq!(output_uri("file:///backup/", "file:///d/a%2541.txt"), "file:///backup/a%2541.txt");
    }

    #[test]
    fn test_validate_uris() {
        assert!(validate_uris("file:///data", "s3://bucket/prefix/").is_ok());
        assert!(validate_uris("file:///data", "file:///backup/").is_ok());
        assert!(validate_uris("not a uri", "s3://bucket/p/").is_err());
        assert!(validate_uris("http://host/data", "s3://bucket/p/").is_err());
        assert!(validate_uris("file:///data", "s3://bucket").is_err());
        assert!(validate_uris("file:///data", "ftp://host/p/").is_err());
    }

    #[test]
    fn test_init_records_job() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = source_dir(temp_dir.path(), &["a.txt"]);
        let mut manager = manager(&MemoryObjectClient::new(), 1);

        let job = manager
            .init(&source, "s3://bucket/p/", Pattern::default())
            .expect("Failed to init job");

        assert_eq!(job.status, JobStatus::Initiated);
        assert_eq!(job.error, JobError::None);
        assert_eq!(manager.job(job.id).expect("job stored"), job);
    }

    #[test]
    fn test_init_with_missing_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = path_to_uri(&temp_dir.path().join("missing"));
        let mut manager = manager(&MemoryObjectClient::new(), 1);

        let result = manager.init(&source, "s3://bucket/p/", Pattern::default());

        assert!(matches!(result, Err(EngineError::InitSource { .. })));
        assert!(manager.jobs(&JobQuery::default()).expect("query").is_empty());
    }

    #[test]
    fn test_init_with_literal_destination_and_many_files() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = source_dir(temp_dir.path(), &["a.txt", "b.txt"]);
        let mut manager = manager(&MemoryObjectClient::new(), 1);

        let result = manager.init(&source, "s3://bucket/one.txt", Pattern::default());

        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = source_dir(temp_dir.path(), &["a.txt", "b.txt"]);
        let mut manager = manager(&MemoryObjectClient::new(), 1);
        let job = manager
            .init(&source, "s3://bucket/p/", Pattern::default())
            .expect("Failed to init job");

        assert_eq!(manager.parse_and_commit_items(job.id).expect("parse"), 2);
        assert_eq!(manager.parse_and_commit_items(job.id).expect("parse again"), 0);

        let items = manager.items(&ItemQuery::for_job(job.id)).expect("query");
        assert_eq!(items.len(), 2);
        assert_eq!(manager.job(job.id).expect("job").status, JobStatus::Parsed);
    }

    #[test]
    fn test_parse_skips_inputs_from_interrupted_parse() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = source_dir(temp_dir.path(), &["a.txt", "b.txt"]);
        let mut manager = manager(&MemoryObjectClient::new(), 1);
        let mut job = manager
            .init(&source, "s3://bucket/p/", Pattern::default())
            .expect("Failed to init job");

        // Simulate a crash after the first item was recorded.
        job.status = JobStatus::Parsing;
        manager.store.update_job(&job).expect("update job");
        let a = format!("{}/a.txt", source);
        manager
            .store
            .insert_items(&[Item::new(job.id, a.as_str(), "s3://bucket/p/a.txt")])
            .expect("insert item");

        assert_eq!(manager.parse_and_commit_items(job.id).expect("parse"), 1);
        let inputs: HashSet<String> = manager
            .items(&ItemQuery::for_job(job.id))
            .expect("query")
            .into_iter()
            .map(|i| i.input)
            .collect();
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn test_run_transfers_and_finishes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = source_dir(temp_dir.path(), &["a.txt", "b.txt", "c.txt"]);
        let client = MemoryObjectClient::new();
        let mut manager = manager(&client, 2);
        let job = manager
            .init(&source, "s3://bucket/p/", Pattern::default())
            .expect("Failed to init job");

        let summary = manager.run(job.id).expect("Failed to run job");

        assert_eq!(summary.transferred, 3);
        assert_eq!(client.keys("bucket"), vec!["p/a.txt", "p/b.txt", "p/c.txt"]);
        let stats = manager.job_summary(job.id).expect("summary");
        assert_eq!(stats.job.status, JobStatus::Done);
        assert_eq!((stats.total, stats.transferred, stats.pending), (3, 3, 0));

        // A finished job is not run again.
        assert_eq!(manager.run(job.id).expect("no-op"), RunSummary::default());
        assert_eq!(manager.resume(job.id).expect("no-op"), RunSummary::default());
    }

    #[test]
    fn test_run_with_missing_file_leaves_transfer_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = source_dir(temp_dir.path(), &["a.txt", "b.txt"]);
        let client = MemoryObjectClient::new();
        let mut manager = manager(&client, 1);
        let job = manager
            .init(&source, "s3://bucket/p/", Pattern::default())
            .expect("Failed to init job");
        manager.parse_and_commit_items(job.id).expect("parse");
        fs::remove_file(temp_dir.path().join("src").join("a.txt")).expect("Failed to remove file");

        let result = manager.run(job.id);

        assert!(matches!(result, Err(EngineError::Remote(_))));
        let stats = manager.job_summary(job.id).expect("summary");
        assert_eq!(stats.job.status, JobStatus::Transferring);
        assert_eq!(stats.job.error, JobError::TransferError);
        assert_eq!(stats.job.info.map(|i| i.operation), Some("Read".to_string()));
        assert_eq!((stats.transferred, stats.pending), (1, 1));
    }

    #[test]
    fn test_rerun_after_failure_finishes_without_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = source_dir(temp_dir.path(), &["a.txt", "b.txt"]);
        let client = MemoryObjectClient::new();
        let mut manager = manager(&client, 1);
        let job = manager
            .init(&source, "s3://bucket/p/", Pattern::default())
            .expect("Failed to init job");
        manager.parse_and_commit_items(job.id).expect("parse");
        let missing = temp_dir.path().join("src").join("a.txt");
        fs::remove_file(&missing).expect("Failed to remove file");

        assert!(manager.run(job.id).is_err());
        assert_eq!(manager.job(job.id).expect("job").error, JobError::TransferError);

        // Run again directly, without going through resume.
        fs::write(&missing, "content of a.txt").expect("Failed to restore file");
        manager.run(job.id).expect("Failed to rerun job");

        let stored = manager.job(job.id).expect("job");
        assert_eq!(stored.status, JobStatus::Done);
        assert_eq!(stored.error, JobError::None);
        assert_eq!(stored.info, None);
        assert_eq!(client.keys("bucket"), vec!["p/a.txt", "p/b.txt"]);
    }

    #[test]
    fn test_run_with_names_needing_escapes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = source_dir(temp_dir.path(), &["report#1.txt", "a%41.txt", "why?.txt"]);
        let client = MemoryObjectClient::new();
        let mut manager = manager(&client, 2);
        let job = manager
            .init(&source, "s3://bucket/p/", Pattern::Glob("*.txt".into()))
            .expect("Failed to init job");

        let summary = manager.run(job.id).expect("Failed to run job");

        assert_eq!(summary.transferred, 3);
        assert_eq!(
            client.keys("bucket"),
            vec!["p/a%41.txt", "p/report#1.txt", "p/why?.txt"]
        );
        let stored = client.object("bucket", "p/report#1.txt").expect("object stored");
        assert_eq!(stored.body, b"content of report#1.txt");
    }

    struct RejectingAuth;

    impl Authenticator for RejectingAuth {
        fn credentials(&self) -> Result<Credentials, AuthenticationFailure> {
            Err(AuthenticationFailure::new("permission denied", "auth/approle/login"))
        }
    }

    #[test]
    fn test_auth_failure_is_recorded() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = source_dir(temp_dir.path(), &["a.txt"]);
        let client = MemoryObjectClient::requiring_credentials();
        let writer = ObjectStoreWriter::new(client.clone()).with_authenticator(Box::new(RejectingAuth));
        let courier = Courier::new(Box::new(FileSystemReader::new()), Box::new(writer));
        let agent = TransferAgent::new(courier, 1, 0.1).expect("valid agent");
        let mut manager = JobManager::new(MemoryStore::new(), agent);
        let job = manager
            .init(&source, "s3://bucket/p/", Pattern::default())
            .expect("Failed to init job");

        let result = manager.run(job.id);

        assert!(matches!(result, Err(EngineError::Authentication(_))));
        let stored = manager.job(job.id).expect("job");
        assert_eq!(stored.error, JobError::AuthError);
        assert_ne!(stored.status, JobStatus::Done);
        assert_eq!(stored.info.map(|i| i.operation), Some("auth/approle/login".to_string()));
        assert!(client.keys("bucket").is_empty());
    }

    #[test]
    fn test_delete_unknown_job() {
        let mut manager = manager(&MemoryObjectClient::new(), 1);
        let id = uuid::Uuid::new_v4();
        assert!(matches!(manager.delete(id), Err(EngineError::JobNotFound { .. })));
    }
}
