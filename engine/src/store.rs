//! Persistence handle for jobs and items.
//!
//! The store is single-writer: it is owned by the job manager and only ever
//! touched from the orchestrating thread. Every mutating call commits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::StoreError;
use crate::fs_ops;
use crate::model::{Item, ItemId, ItemStatus, Job, JobError, JobId, JobStatus};

/// Equality filters over jobs. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuery {
    pub id: Option<JobId>,
    pub status: Option<JobStatus>,
    pub error: Option<JobError>,
    pub source: Option<String>,
    pub destination: Option<String>,
    /// Keep only the most recent `limit` jobs
    pub limit: Option<usize>,
}

impl JobQuery {
    pub fn matches(&self, job: &Job) -> bool {
        self.id.map_or(true, |id| job.id == id)
            && self.status.map_or(true, |s| job.status == s)
            && self.error.map_or(true, |e| job.error == e)
            && self.source.as_ref().map_or(true, |s| &job.source == s)
            && self.destination.as_ref().map_or(true, |d| &job.destination == d)
    }
}

/// Equality filters over items. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQuery {
    pub job_id: Option<JobId>,
    pub status: Option<ItemStatus>,
    /// Keep only the first `limit` items
    pub limit: Option<usize>,
}

impl ItemQuery {
    pub fn for_job(job_id: JobId) -> Self {
        ItemQuery {
            job_id: Some(job_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.job_id.map_or(true, |id| item.job_id == id)
            && self.status.map_or(true, |s| item.status == s)
    }
}

/// Create/read/update/delete for jobs and items.
pub trait Store {
    fn insert_job(&mut self, job: &Job) -> Result<(), StoreError>;

    fn job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    fn update_job(&mut self, job: &Job) -> Result<(), StoreError>;

    /// Remove a job and all of its items. Returns false if the job did not exist.
    fn delete_job(&mut self, id: JobId) -> Result<bool, StoreError>;

    /// Jobs matching `query`, oldest first.
    fn jobs(&self, query: &JobQuery) -> Result<Vec<Job>, StoreError>;

    fn insert_items(&mut self, items: &[Item]) -> Result<(), StoreError>;

    fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError>;

    fn update_item(&mut self, item: &Item) -> Result<(), StoreError>;

    /// Update several items in one commit.
    fn update_items(&mut self, items: &[Item]) -> Result<(), StoreError> {
        for item in items {
            self.update_item(item)?;
        }
        Ok(())
    }

    /// Items matching `query`, in creation order.
    fn items(&self, query: &ItemQuery) -> Result<Vec<Item>, StoreError>;
}

/// The full persisted state shared by both store implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    jobs: BTreeMap<JobId, Job>,
    items: BTreeMap<ItemId, Item>,
}

impl StoreState {
    fn insert_job(&mut self, job: &Job) {
        self.jobs.insert(job.id, job.clone());
    }

    fn update_job(&mut self, job: &Job) -> Result<(), StoreError> {
        match self.jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(StoreError::Missing {
                entity: "job",
                id: job.id,
            }),
        }
    }

    fn delete_job(&mut self, id: JobId) -> bool {
        let existed = self.jobs.remove(&id).is_some();
        self.items.retain(|_, item| item.job_id != id);
        existed
    }

    fn jobs(&self, query: &JobQuery) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().filter(|j| query.matches(j)).cloned().collect();
        // Most recent first so the limit keeps the latest jobs, then back to oldest first
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            jobs.truncate(limit);
        }
        jobs.reverse();
        jobs
    }

    fn insert_items(&mut self, items: &[Item]) -> Result<(), StoreError> {
        if let Some(orphan) = items.iter().find(|i| !self.jobs.contains_key(&i.job_id)) {
            return Err(StoreError::Missing {
                entity: "job",
                id: orphan.job_id,
            });
        }
        for item in items {
            self.items.insert(item.id, item.clone());
        }
        Ok(())
    }

    fn update_item(&mut self, item: &Item) -> Result<(), StoreError> {
        match self.items.get_mut(&item.id) {
            Some(stored) => {
                *stored = item.clone();
                Ok(())
            }
            None => Err(StoreError::Missing {
                entity: "item",
                id: item.id,
            }),
        }
    }

    fn items(&self, query: &ItemQuery) -> Vec<Item> {
        let mut items: Vec<Item> = self.items.values().filter(|i| query.matches(i)).cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.input.cmp(&b.input)));
        if let Some(limit) = query.limit {
            items.truncate(limit);
        }
        items
    }
}

/// Volatile store, for tests and one-shot embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: StoreState,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn insert_job(&mut self, job: &Job) -> Result<(), StoreError> {
        self.state.insert_job(job);
        Ok(())
    }

    fn job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.state.jobs.get(&id).cloned())
    }

    fn update_job(&mut self, job: &Job) -> Result<(), StoreError> {
        self.state.update_job(job)
    }

    fn delete_job(&mut self, id: JobId) -> Result<bool, StoreError> {
        Ok(self.state.delete_job(id))
    }

    fn jobs(&self, query: &JobQuery) -> Result<Vec<Job>, StoreError> {
        Ok(self.state.jobs(query))
    }

    fn insert_items(&mut self, items: &[Item]) -> Result<(), StoreError> {
        self.state.insert_items(items)
    }

    fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.state.items.get(&id).cloned())
    }

    fn update_item(&mut self, item: &Item) -> Result<(), StoreError> {
        self.state.update_item(item)
    }

    fn items(&self, query: &ItemQuery) -> Result<Vec<Item>, StoreError> {
        Ok(self.state.items(query))
    }
}

/// Store persisted as a single JSON document.
///
/// Each commit rewrites the whole document through a temporary file and a
/// rename, so a crash leaves either the previous or the new state on disk.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    state: StoreState,
}

impl JsonStore {
    /// Open the store at `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => StoreState::default(),
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        debug!(path = %path.display(), jobs = state.jobs.len(), "opened store");
        Ok(JsonStore { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the state and keep it only once it is on disk.
    fn apply<T>(&mut self, change: impl FnOnce(&mut StoreState) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut next = self.state.clone();
        let value = change(&mut next)?;
        self.commit(&next)?;
        self.state = next;
        Ok(value)
    }

    fn commit(&self, state: &StoreState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        fs_ops::write_file_atomic(&self.path, &bytes).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

impl Store for JsonStore {
    fn insert_job(&mut self, job: &Job) -> Result<(), StoreError> {
        self.apply(|state| {
            state.insert_job(job);
            Ok(())
        })
    }

    fn job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.state.jobs.get(&id).cloned())
    }

    fn update_job(&mut self, job: &Job) -> Result<(), StoreError> {
        self.apply(|state| state.update_job(job))
    }

    fn delete_job(&mut self, id: JobId) -> Result<bool, StoreError> {
        self.apply(|state| Ok(state.delete_job(id)))
    }

    fn jobs(&self, query: &JobQuery) -> Result<Vec<Job>, StoreError> {
        Ok(self.state.jobs(query))
    }

    fn insert_items(&mut self, items: &[Item]) -> Result<(), StoreError> {
        self.apply(|state| state.insert_items(items))
    }

    fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.state.items.get(&id).cloned())
    }

    fn update_item(&mut self, item: &Item) -> Result<(), StoreError> {
        self.apply(|state| state.update_item(item))
    }

    fn update_items(&mut self, items: &[Item]) -> Result<(), StoreError> {
        self.apply(|state| items.iter().try_for_each(|item| state.update_item(item)))
    }

    fn items(&self, query: &ItemQuery) -> Result<Vec<Item>, StoreError> {
        Ok(self.state.items(query))
    }
}
