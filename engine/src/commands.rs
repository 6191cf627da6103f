//! Post-processing commands applied to transfer outcomes.
//!
//! Commands hook into the transfer agent at two points: after each
//! transaction (`PostTransaction`) and after each batch (`PostBatch`). They
//! receive a `JobContext` holding the persistence handle, which only the
//! orchestrating thread ever owns.
//!
//! With more than one worker, persistence-writing commands are registered
//! only at the batch hook, where they run once after the pool has drained.
//! `CommandSet::for_workers` makes that selection.

use tracing::{debug, warn};

use crate::error::EngineError;
use crate::model::{ErrorInfo, Job, Transaction};
use crate::store::Store;

/// Mutable state a command may act on.
pub struct JobContext<'a> {
    pub store: &'a mut dyn Store,
    pub job: &'a mut Job,
}

impl<'a> JobContext<'a> {
    pub fn new(store: &'a mut dyn Store, job: &'a mut Job) -> Self {
        JobContext { store, job }
    }
}

/// Invoked once per transaction, right after its transfer attempt.
pub trait PostTransaction {
    fn on_transaction(
        &mut self,
        ctx: &mut JobContext<'_>,
        transaction: &Transaction,
    ) -> Result<(), EngineError>;
}

/// Invoked once per batch, after every transaction in it has completed.
pub trait PostBatch {
    fn on_batch(&mut self, ctx: &mut JobContext<'_>, batch: &[Transaction]) -> Result<(), EngineError>;
}

/// The commands registered for one run of the transfer agent.
#[derive(Default)]
pub struct CommandSet {
    pub(crate) per_transaction: Vec<Box<dyn PostTransaction>>,
    pub(crate) per_batch: Vec<Box<dyn PostBatch>>,
}

impl CommandSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post_transaction(mut self, command: impl PostTransaction + 'static) -> Self {
        self.per_transaction.push(Box::new(command));
        self
    }

    pub fn post_batch(mut self, command: impl PostBatch + 'static) -> Self {
        self.per_batch.push(Box::new(command));
        self
    }

    /// The standard pipeline for a run with `workers` workers.
    ///
    /// One worker: item and job updates persist after every transaction.
    /// Several workers: the same updates run at the batch hook instead.
    /// Either way the first failure is raised after the batch.
    pub fn for_workers(workers: usize) -> Self {
        if workers > 1 {
            Self::new()
                .post_batch(UpdateItemStatus)
                .post_batch(UpdateJobError)
                .post_batch(RaiseFirstFailure)
        } else {
            Self::new()
                .post_transaction(UpdateItemStatus)
                .post_transaction(UpdateJobError)
                .post_batch(RaiseFirstFailure)
        }
    }

    pub(crate) fn after_transaction(
        &mut self,
        ctx: &mut JobContext<'_>,
        transaction: &Transaction,
    ) -> Result<(), EngineError> {
        for command in &mut self.per_transaction {
            command.on_transaction(ctx, transaction)?;
        }
        Ok(())
    }

    pub(crate) fn after_batch(
        &mut self,
        ctx: &mut JobContext<'_>,
        batch: &[Transaction],
    ) -> Result<(), EngineError> {
        for command in &mut self.per_batch {
            command.on_batch(ctx, batch)?;
        }
        Ok(())
    }
}

/// Marks successfully transferred items as TRANSFERRED and persists them.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpdateItemStatus;

impl PostTransaction for UpdateItemStatus {
    fn on_transaction(
        &mut self,
        ctx: &mut JobContext<'_>,
        transaction: &Transaction,
    ) -> Result<(), EngineError> {
        self.on_batch(ctx, std::slice::from_ref(transaction))
    }
}

impl PostBatch for UpdateItemStatus {
    fn on_batch(&mut self, ctx: &mut JobContext<'_>, batch: &[Transaction]) -> Result<(), EngineError> {
        let mut transferred = Vec::new();
        for transaction in batch.iter().filter(|t| t.succeeded()) {
            let mut item = ctx
                .store
                .item(transaction.item_id)?
                .ok_or(crate::error::StoreError::Missing {
                    entity: "item",
                    id: transaction.item_id,
                })?;
            item.mark_transferred();
            transferred.push(item);
        }
        if !transferred.is_empty() {
            ctx.store.update_items(&transferred)?;
            debug!(job_id = %ctx.job.id, count = transferred.len(), "items marked transferred");
        }
        Ok(())
    }
}

/// Raises the job error to the most severe failure seen and persists it.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpdateJobError;

impl PostTransaction for UpdateJobError {
    fn on_transaction(
        &mut self,
        ctx: &mut JobContext<'_>,
        transaction: &Transaction,
    ) -> Result<(), EngineError> {
        self.on_batch(ctx, std::slice::from_ref(transaction))
    }
}

impl PostBatch for UpdateJobError {
    fn on_batch(&mut self, ctx: &mut JobContext<'_>, batch: &[Transaction]) -> Result<(), EngineError> {
        let mut changed = false;
        for (transaction, failure) in batch.iter().filter_map(|t| t.failure().map(|f| (t, f))) {
            warn!(
                job_id = %ctx.job.id,
                input = %transaction.input,
                output = %transaction.output,
                operation = %failure.operation,
                "transfer failed: {}",
                failure.message
            );
            ctx.job.escalate(
                failure.job_error(),
                ErrorInfo {
                    message: failure.message.clone(),
                    operation: failure.operation.clone(),
                },
            );
            changed = true;
        }
        if changed {
            ctx.store.update_job(ctx.job)?;
        }
        Ok(())
    }
}

/// Returns the first captured failure of a batch as an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct RaiseFirstFailure;

impl PostBatch for RaiseFirstFailure {
    fn on_batch(&mut self, _ctx: &mut JobContext<'_>, batch: &[Transaction]) -> Result<(), EngineError> {
        match batch.iter().find_map(Transaction::failure) {
            Some(failure) => Err(EngineError::Remote(failure.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteFailure;
    use crate::model::{Item, ItemStatus, JobError, Outcome, Pattern};
    use crate::store::{ItemQuery, MemoryStore};

    fn setup(n: usize) -> (MemoryStore, Job, Vec<Transaction>) {
        let mut store = MemoryStore::new();
        let job = Job::new("file:///data/", "s3://bucket/p/", Pattern::default());
        store.insert_job(&job).expect("insert job");
        let items: Vec<Item> = (0..n)
            .map(|i| Item::new(job.id, format!("file:///data/{i}.ext"), format!("s3://bucket/p/{i}.ext")))
            .collect();
        store.insert_items(&items).expect("insert items");
        let transactions = items.iter().map(Transaction::from_item).collect();
        (store, job, transactions)
    }

    #[test]
    fn test_update_item_status_only_marks_successes() {
        let (mut store, mut job, mut txs) = setup(2);
        txs[0].outcome = Outcome::Success;
        txs[1].outcome = Outcome::Failed(RemoteFailure::transfer("boom", "PutObject"));

        let mut ctx = JobContext::new(&mut store, &mut job);
        UpdateItemStatus.on_batch(&mut ctx, &txs).expect("update items");

        let first = store.item(txs[0].item_id).expect("lookup").expect("exists");
        let second = store.item(txs[1].item_id).expect("lookup").expect("exists");
        assert_eq!(first.status, ItemStatus::Transferred);
        assert!(first.transferred_at.is_some());
        assert_eq!(second.status, ItemStatus::Pending);
    }

    #[test]
    fn test_update_job_error_takes_max_severity_in_any_order() {
        let (mut store, mut job, mut txs) = setup(2);
        txs[0].outcome = Outcome::Failed(RemoteFailure::checksum("bad digest", "PutObject"));
        txs[1].outcome = Outcome::Failed(RemoteFailure::transfer("reset", "PutObject"));

        let mut ctx = JobContext::new(&mut store, &mut job);
        UpdateJobError.on_batch(&mut ctx, &txs).expect("update job");

        assert_eq!(job.error, JobError::ChecksumError);
        let persisted = store.job(job.id).expect("lookup").expect("exists");
        assert_eq!(persisted.error, JobError::ChecksumError);
        assert_eq!(persisted.info.map(|i| i.message), Some("bad digest".to_string()));
    }

    #[test]
    fn test_raise_first_failure_returns_first_in_batch_order() {
        let (mut store, mut job, mut txs) = setup(3);
        txs[0].outcome = Outcome::Success;
        txs[1].outcome = Outcome::Failed(RemoteFailure::transfer("first", "PutObject"));
        txs[2].outcome = Outcome::Failed(RemoteFailure::checksum("second", "PutObject"));

        let mut ctx = JobContext::new(&mut store, &mut job);
        let err = RaiseFirstFailure
            .on_batch(&mut ctx, &txs)
            .expect_err("batch has failures");

        match err {
            EngineError::Remote(failure) => assert_eq!(failure.message, "first"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_for_workers_selects_hooks() {
        let sequential = CommandSet::for_workers(1);
        assert_eq!(sequential.per_transaction.len(), 2);
        assert_eq!(sequential.per_batch.len(), 1);

        let concurrent = CommandSet::for_workers(8);
        assert!(concurrent.per_transaction.is_empty());
        assert_eq!(concurrent.per_batch.len(), 3);
    }

    #[test]
    fn test_clean_batch_touches_nothing() {
        let (mut store, mut job, txs) = setup(1);
        let mut commands = CommandSet::for_workers(4);

        let mut ctx = JobContext::new(&mut store, &mut job);
        commands.after_batch(&mut ctx, &txs).expect("unset outcomes are not failures");

        let items = store.items(&ItemQuery::for_job(job.id)).expect("query");
        assert_eq!(items[0].status, ItemStatus::Pending);
        assert_eq!(job.error, JobError::None);
    }
}
