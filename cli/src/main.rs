//! Forward - Command-line interface for the forwarding engine.
//!
//! Creates, runs, resumes, lists and deletes forwarding jobs. Job state is
//! kept in a JSON file so an interrupted job can be resumed later.

mod logging;
mod s3;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use engine::config::parse_checksum;
use engine::fs_ops::path_to_uri;
use engine::{
    Courier, EngineConfig, EngineError, EnvCredentials, FileSystemReader, FileSystemWriter, Item, ItemQuery,
    ItemStatus, Job, JobError, JobId, JobManager, JobQuery, JobStatus, JsonStore, ObjectStoreWriter,
    Pattern, ProgressCallback, RunSummary, Store, TransferAgent, Transaction, Writer,
};

use crate::s3::{S3Client, S3Settings};

/// Forward - resumable file forwarding to a directory or an object store
#[derive(Parser, Debug)]
#[command(name = "forward")]
#[command(version = "0.1.0")]
#[command(about = "Forward files to a local directory or an S3 bucket, resumably")]
struct Cli {
    /// Job store location (default: $FORWARD_DB_PATH or ~/.cache/forward.json)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, global = true)]
    verbose: bool,

    /// Object store region
    #[arg(long, global = true, value_name = "REGION", default_value = "us-east-1")]
    region: String,

    /// Custom object store endpoint (S3-compatible services)
    #[arg(long, global = true, value_name = "URL")]
    endpoint_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a job and run it
    Run(RunArgs),

    /// Resume a failed or interrupted job
    Resume {
        /// Job identifier
        id: String,

        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// List jobs
    Ls {
        /// Only the job with this identifier
        #[arg(long)]
        id: Option<String>,

        /// Filter by status (e.g. TRANSFERRING, DONE)
        #[arg(long)]
        status: Option<String>,

        /// Filter by error (e.g. TRANSFER_ERROR)
        #[arg(long)]
        error: Option<String>,

        /// Show only the most recent jobs
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List the items of jobs
    Items {
        /// Only items of this job
        #[arg(long)]
        job_id: Option<String>,

        /// Filter by status (PENDING or TRANSFERRED)
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete a job and its items
    Rm {
        /// Job identifier
        id: String,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Source directory or file (path or file:// URI)
    source: String,

    /// Destination (path, file:// or s3:// URI); a trailing '/' makes it a prefix
    destination: String,

    /// Only forward files whose names match (glob unless --regex)
    #[arg(long, value_name = "PATTERN")]
    pattern: Option<String>,

    /// Treat --pattern as a regular expression
    #[arg(long, requires = "pattern")]
    regex: bool,

    #[command(flatten)]
    transfer: TransferArgs,
}

#[derive(Args, Debug)]
struct TransferArgs {
    /// Number of concurrent transfer workers
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Fraction of the pending files dispatched per batch, in (0, 1]
    #[arg(long, value_name = "RATIO")]
    split_ratio: Option<f64>,

    /// Checksum algorithm sent with every file: sha256 or md5
    #[arg(long, value_name = "ALGORITHM", conflicts_with = "no_checksum")]
    checksum: Option<String>,

    /// Do not send checksums
    #[arg(long)]
    no_checksum: bool,
}

impl TransferArgs {
    /// Overlay the flags on `config`.
    fn apply(&self, mut config: EngineConfig) -> Result<EngineConfig, String> {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(split_ratio) = self.split_ratio {
            config.split_ratio = split_ratio;
        }
        if let Some(checksum) = &self.checksum {
            config.checksum = parse_checksum(checksum).map_err(|e| e.to_string())?;
        }
        if self.no_checksum {
            config.checksum = None;
        }
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

/// CLI implementation of ProgressCallback for displaying transfer progress
struct CliProgress {
    verbose: bool,
    start_time: Instant,
    pending: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
            pending: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_run_started(&self, job: &Job, pending: usize) {
        self.pending.store(pending, Ordering::Relaxed);
        eprintln!("Forwarding job {}", job.id);
        eprintln!("  Source: {}", job.source);
        eprintln!("  Destination: {}", job.destination);
        eprintln!("  Pending: {} files", pending);
        eprintln!();
    }

    fn on_transaction_completed(&self, transaction: &Transaction) {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let pending = self.pending.load(Ordering::Relaxed);
        match transaction.failure() {
            Some(failure) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                eprintln!("[{:>4}/{}] Failed: {}: {}", done, pending, transaction.input, failure.message);
            }
            None if self.verbose => {
                eprintln!("[{:>4}/{}] Done: {}", done, pending, transaction.output);
            }
            None => {}
        }
    }

    fn on_batch_completed(&self, batch_index: usize, batch: &[Transaction]) {
        if self.verbose {
            eprintln!("Batch {} complete ({} files)", batch_index + 1, batch.len());
        }
    }

    fn on_run_completed(&self, job: &Job) {
        eprintln!();
        eprintln!("Transfer complete!");
        eprintln!(
            "Summary: {} transferred, {} failed",
            self.completed.load(Ordering::Relaxed) - self.failed.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed)
        );
        eprintln!("Status: {}", job.status);
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));
    }
}

/// Parse and validate command-line arguments, then dispatch the subcommand
fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    // Exit code tracking
    let exit_code = match run_cli(&cli) {
        Ok(()) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(cli: &Cli) -> Result<(), String> {
    let mut config = EngineConfig::from_env().map_err(|e| e.to_string())?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    let store = JsonStore::open(&config.db_path).map_err(|e| format!("Failed to open job store: {}", e))?;
    debug!(db = %config.db_path.display(), "opened job store");
    let settings = S3Settings {
        region: cli.region.clone(),
        endpoint_url: cli.endpoint_url.clone(),
    };

    match &cli.command {
        Command::Run(args) => {
            let config = args.transfer.apply(config)?;
            let source = to_uri(&args.source)?;
            let destination = to_uri(&args.destination)?;
            let pattern = match (&args.pattern, args.regex) {
                (Some(pattern), true) => Pattern::Regex(pattern.clone()),
                (Some(pattern), false) => Pattern::Glob(pattern.clone()),
                (None, _) => Pattern::default(),
            };

            let mut manager = build_manager(store, Some(&destination), &config, &settings, cli.verbose)?;
            let job = manager
                .init(&source, &destination, pattern)
                .map_err(|e| format!("Job creation failed: {}", e))?;
            println!("{}", job.id);
            finish(manager.run(job.id), job.id)
        }
        Command::Resume { id, transfer } => {
            let id = parse_id(id)?;
            let job = store
                .job(id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("Job not found: {}", id))?;
            let config = transfer.apply(config)?;

            let mut manager = build_manager(store, Some(&job.destination), &config, &settings, cli.verbose)?;
            finish(manager.resume(id), id)
        }
        Command::Ls {
            id,
            status,
            error,
            limit,
        } => {
            let query = JobQuery {
                id: id.as_deref().map(parse_id).transpose()?,
                status: status.as_deref().map(parse_job_status).transpose()?,
                error: error.as_deref().map(parse_job_error).transpose()?,
                limit: *limit,
                ..JobQuery::default()
            };
            let manager = build_manager(store, None, &config, &settings, cli.verbose)?;
            let jobs = manager.jobs(&query).map_err(|e| e.to_string())?;
            print_jobs(&jobs);
            Ok(())
        }
        Command::Items { job_id, status, limit } => {
            let query = ItemQuery {
                job_id: job_id.as_deref().map(parse_id).transpose()?,
                status: status.as_deref().map(parse_item_status).transpose()?,
                limit: *limit,
            };
            let manager = build_manager(store, None, &config, &settings, cli.verbose)?;
            let items = manager.items(&query).map_err(|e| e.to_string())?;
            print_items(&items);
            Ok(())
        }
        Command::Rm { id } => {
            let id = parse_id(id)?;
            let mut manager = build_manager(store, None, &config, &settings, cli.verbose)?;
            manager.delete(id).map_err(|e| e.to_string())?;
            eprintln!("Deleted job {}", id);
            Ok(())
        }
    }
}

/// Build a job manager whose writer fits `destination`.
///
/// `s3://` destinations get an object store writer with credentials from
/// the environment; anything else writes to the local filesystem.
fn build_manager(
    store: JsonStore,
    destination: Option<&str>,
    config: &EngineConfig,
    settings: &S3Settings,
    verbose: bool,
) -> Result<JobManager<JsonStore>, String> {
    let writer: Box<dyn Writer> = match destination {
        Some(destination) if destination.starts_with("s3://") => {
            let client =
                S3Client::new(settings.clone()).map_err(|e| format!("Failed to start S3 runtime: {}", e))?;
            Box::new(ObjectStoreWriter::new(client).with_authenticator(Box::new(EnvCredentials::new())))
        }
        _ => Box::new(FileSystemWriter::new()),
    };

    let courier = Courier::new(Box::new(FileSystemReader::new()), writer).with_checksum(config.checksum);
    let agent = TransferAgent::from_config(courier, config).map_err(|e| e.to_string())?;
    Ok(JobManager::new(store, agent).with_progress(Box::new(CliProgress::new(verbose))))
}

/// Map a run result to the CLI result.
fn finish(result: Result<RunSummary, EngineError>, id: JobId) -> Result<(), String> {
    result
        .map(|_| ())
        .map_err(|e| format!("Job {} failed: {} (resume with `forward resume {}`)", id, e, id))
}

/// Accept URIs verbatim and turn plain paths into absolute `file://` URIs.
fn to_uri(arg: &str) -> Result<String, String> {
    if arg.contains("://") {
        return Ok(arg.to_string());
    }
    let path = PathBuf::from(arg);
    let absolute = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map_err(|e| format!("Cannot resolve {}: {}", arg, e))?
            .join(path)
    };
    let mut uri = path_to_uri(&absolute);
    if arg.ends_with('/') && !uri.ends_with('/') {
        uri.push('/');
    }
    Ok(uri)
}

fn parse_id(value: &str) -> Result<Uuid, String> {
    Uuid::parse_str(value).map_err(|e| format!("Invalid job id '{}': {}", value, e))
}

fn parse_job_status(value: &str) -> Result<JobStatus, String> {
    JobStatus::parse(value).ok_or_else(|| format!("Invalid job status '{}'", value))
}

fn parse_job_error(value: &str) -> Result<JobError, String> {
    JobError::parse(value).ok_or_else(|| format!("Invalid job error '{}'", value))
}

fn parse_item_status(value: &str) -> Result<ItemStatus, String> {
    ItemStatus::parse(value).ok_or_else(|| format!("Invalid item status '{}'", value))
}

fn print_jobs(jobs: &[Job]) {
    for job in jobs {
        println!(
            "{}  {:<12}  {:<14}  {}  {} -> {}  [{}]",
            job.id,
            job.status.to_string(),
            job.error.to_string(),
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.source,
            job.destination,
            job.pattern
        );
        if let Some(info) = &job.info {
            println!("    {}: {}", info.operation, info.message);
        }
    }
}

fn print_items(items: &[Item]) {
    for item in items {
        let transferred = item
            .transferred_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {:<11}  {}  {} -> {}",
            item.job_id,
            item.id,
            item.status.to_string(),
            transferred,
            item.input,
            item.output
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn cli(db: &Path, args: &[&str]) -> Cli {
        let mut argv = vec!["forward".to_string(), "--db".to_string(), db.display().to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        Cli::try_parse_from(argv).expect("Failed to parse arguments")
    }

    fn jobs_in(db: &Path) -> Vec<Job> {
        JsonStore::open(db)
            .expect("Failed to open store")
            .jobs(&JobQuery::default())
            .expect("Failed to list jobs")
    }

    #[test]
    fn test_cli_run_to_local_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        std::fs::create_dir(&src).expect("Failed to create src dir");
        std::fs::write(src.join("test.txt"), "hello").expect("Failed to write file");
        let dst = format!("{}/", temp_dir.path().join("dst").display());
        let db = temp_dir.path().join("forward.json");

        let result = run_cli(&cli(&db, &["run", src.to_str().expect("utf-8 path"), &dst, "--workers", "2"]));

        assert!(result.is_ok(), "CLI should succeed: {:?}", result);
        let copied = std::fs::read_to_string(temp_dir.path().join("dst").join("test.txt"))
            .expect("Failed to read copied file");
        assert_eq!(copied, "hello");
        let jobs = jobs_in(&db);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Done);
    }

    #[test]
    fn test_cli_rejects_duplicate_run() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        std::fs::create_dir(&src).expect("Failed to create src dir");
        std::fs::write(src.join("test.txt"), "hello").expect("Failed to write file");
        let dst = format!("{}/", temp_dir.path().join("dst").display());
        let db = temp_dir.path().join("forward.json");
        let args = ["run", src.to_str().expect("utf-8 path"), dst.as_str()];

        run_cli(&cli(&db, &args)).expect("first run should succeed");
        let result = run_cli(&cli(&db, &args));

        assert!(result.is_err(), "CLI should reject a duplicate job");
        assert_eq!(jobs_in(&db).len(), 1);
    }

    #[test]
    fn test_cli_rm_deletes_job() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        std::fs::create_dir(&src).expect("Failed to create src dir");
        std::fs::write(src.join("test.txt"), "hello").expect("Failed to write file");
        let dst = format!("{}/", temp_dir.path().join("dst").display());
        let db = temp_dir.path().join("forward.json");
        run_cli(&cli(&db, &["run", src.to_str().expect("utf-8 path"), &dst])).expect("run should succeed");
        let id = jobs_in(&db)[0].id.to_string();

        assert!(run_cli(&cli(&db, &["ls", "--status", "DONE"])).is_ok());
        assert!(run_cli(&cli(&db, &["items", "--job-id", &id])).is_ok());
        run_cli(&cli(&db, &["rm", &id])).expect("rm should succeed");

        assert!(jobs_in(&db).is_empty());
        assert!(run_cli(&cli(&db, &["rm", &id])).is_err(), "second rm should fail");
    }

    #[test]
    fn test_cli_resume_unknown_job() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = temp_dir.path().join("forward.json");

        let result = run_cli(&cli(&db, &["resume", &Uuid::new_v4().to_string()]));

        assert!(result.is_err(), "CLI should reject an unknown job");
    }

    #[test]
    fn test_cli_rejects_invalid_arguments() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = temp_dir.path().join("forward.json");

        assert!(run_cli(&cli(&db, &["rm", "not-a-uuid"])).is_err());
        assert!(run_cli(&cli(&db, &["ls", "--status", "SLEEPING"])).is_err());
        assert!(run_cli(&cli(&db, &["run", "/src", "/dst/", "--checksum", "crc32"])).is_err());
        assert!(run_cli(&cli(&db, &["run", "/src", "/dst/", "--workers", "0"])).is_err());
        assert!(jobs_in(&db).is_empty());
    }

    #[test]
    fn test_cli_rejects_conflicting_checksum_flags() {
        let result = Cli::try_parse_from(["forward", "run", "/src", "/dst/", "--checksum", "md5", "--no-checksum"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_to_uri() {
        assert_eq!(to_uri("s3://bucket/p/").expect("uri"), "s3://bucket/p/");
        assert_eq!(to_uri("/data/in").expect("path"), "file:///data/in");
        assert_eq!(to_uri("/data/out/").expect("path"), "file:///data/out/");
    }
}
