//! The transfer agent: executes a list of transactions.
//!
//! With one worker, transactions run in order on the calling thread and the
//! per-transaction commands fire after each one. With more workers, the
//! transactions are split into batches; each batch is fanned out to a scoped
//! thread pool and the batch commands run once the pool has drained.
//!
//! Workers only ever see the `Courier`. Outcomes travel back over a channel
//! and are applied on the orchestrating thread, which is also the only
//! thread that touches the store.

use crossbeam_channel::unbounded;
use tracing::{debug, info};

use crate::commands::{CommandSet, JobContext};
use crate::config::EngineConfig;
use crate::error::{AuthenticationFailure, EngineError};
use crate::model::{Outcome, Transaction};
use crate::progress::ProgressCallback;
use crate::transfer::Courier;

/// Counts for a run that completed without a raised error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub transferred: usize,
    pub failed: usize,
    pub batches: usize,
}

impl RunSummary {
    fn tally(&mut self, batch: &[Transaction]) {
        self.transferred += batch.iter().filter(|t| t.succeeded()).count();
        self.failed += batch.iter().filter(|t| t.failure().is_some()).count();
        self.batches += 1;
    }
}

pub struct TransferAgent {
    courier: Courier,
    workers: usize,
    split_ratio: f64,
}

impl TransferAgent {
    pub fn new(courier: Courier, workers: usize, split_ratio: f64) -> Result<Self, EngineError> {
        EngineConfig::new()
            .with_workers(workers)
            .with_split_ratio(split_ratio)
            .validate()?;
        Ok(TransferAgent {
            courier,
            workers,
            split_ratio,
        })
    }

    /// Agent with the worker count and split ratio of `config`.
    pub fn from_config(courier: Courier, config: &EngineConfig) -> Result<Self, EngineError> {
        Self::new(courier, config.workers, config.split_ratio)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn split_ratio(&self) -> f64 {
        self.split_ratio
    }

    pub fn courier(&self) -> &Courier {
        &self.courier
    }

    /// Refresh the courier's credentials. Needs `&mut`, so never overlaps a run.
    pub fn refresh_credentials(&mut self) -> Result<(), AuthenticationFailure> {
        self.courier.refresh_credentials()
    }

    /// Execute `transactions`, running `commands` on their outcomes.
    ///
    /// Transfer failures are captured in each transaction's outcome; they
    /// only surface as an error if a command raises one. An error from a
    /// batch's commands stops the run before the next batch is dispatched.
    pub fn run(
        &self,
        transactions: Vec<Transaction>,
        ctx: &mut JobContext<'_>,
        commands: &mut CommandSet,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<RunSummary, EngineError> {
        if transactions.is_empty() {
            debug!(job_id = %ctx.job.id, "nothing to transfer");
            return Ok(RunSummary::default());
        }

        if self.workers.min(transactions.len()) <= 1 {
            self.run_sequential(transactions, ctx, commands, progress)
        } else {
            self.run_concurrent(transactions, ctx, commands, progress)
        }
    }

    fn run_sequential(
        &self,
        mut transactions: Vec<Transaction>,
        ctx: &mut JobContext<'_>,
        commands: &mut CommandSet,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<RunSummary, EngineError> {
        info!(job_id = %ctx.job.id, count = transactions.len(), "transferring sequentially");

        for transaction in transactions.iter_mut() {
            transaction.outcome = self.courier.send(&transaction.input, &transaction.output).into();
            if let Some(callback) = progress {
                callback.on_transaction_completed(transaction);
            }
            commands.after_transaction(ctx, transaction)?;
        }

        let mut summary = RunSummary::default();
        summary.tally(&transactions);
        commands.after_batch(ctx, &transactions)?;
        if let Some(callback) = progress {
            callback.on_batch_completed(0, &transactions);
        }
        Ok(summary)
    }

    fn run_concurrent(
        &self,
        transactions: Vec<Transaction>,
        ctx: &mut JobContext<'_>,
        commands: &mut CommandSet,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<RunSummary, EngineError> {
        let batches = split_into_batches(transactions, self.split_ratio);
        let total = batches.len();
        info!(
            job_id = %ctx.job.id,
            batches = total,
            workers = self.workers,
            "transferring concurrently"
        );

        let mut summary = RunSummary::default();
        for (index, mut batch) in batches.into_iter().enumerate() {
            debug!(batch = index + 1, of = total, size = batch.len(), "dispatching batch");
            self.execute_batch(&mut batch, progress);

            for transaction in &batch {
                commands.after_transaction(ctx, transaction)?;
            }
            summary.tally(&batch);
            commands.after_batch(ctx, &batch)?;
            if let Some(callback) = progress {
                callback.on_batch_completed(index, &batch);
            }
        }
        Ok(summary)
    }

    /// Fan one batch out to the worker pool and wait for it to drain.
    fn execute_batch(&self, batch: &mut [Transaction], progress: Option<&dyn ProgressCallback>) {
        let workers = self.workers.min(batch.len());
        let courier = &self.courier;
        let pending: &[Transaction] = &*batch;

        let outcomes = std::thread::scope(|scope| {
            let (work_tx, work_rx) = unbounded::<usize>();
            let (done_tx, done_rx) = unbounded::<(usize, Outcome)>();

            for index in 0..pending.len() {
                // The receiver is held right here, so this cannot fail.
                let _ = work_tx.send(index);
            }
            drop(work_tx);

            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for index in work_rx.iter() {
                        let transaction = &pending[index];
                        let outcome: Outcome = courier.send(&transaction.input, &transaction.output).into();
                        if done_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            let mut outcomes = vec![Outcome::Unset; pending.len()];
            for (index, outcome) in done_rx.iter() {
                if let Some(callback) = progress {
                    let mut completed = pending[index].clone();
                    completed.outcome = outcome.clone();
                    callback.on_transaction_completed(&completed);
                }
                outcomes[index] = outcome;
            }
            outcomes
        });

        for (transaction, outcome) in batch.iter_mut().zip(outcomes) {
            transaction.outcome = outcome;
        }
    }
}

/// Split transactions into striped batches.
///
/// The batch size is `round(split_ratio * len)` (at least 1) and the number
/// of batches `round(len / size)`, clamped to `1..=len`. Transaction `i`
/// lands in batch `i % count`, so every transaction appears exactly once.
pub fn split_into_batches(transactions: Vec<Transaction>, split_ratio: f64) -> Vec<Vec<Transaction>> {
    let len = transactions.len();
    if len == 0 {
        return Vec::new();
    }

    let size = ((split_ratio * len as f64).round() as usize).max(1);
    let count = ((len as f64 / size as f64).round() as usize).clamp(1, len);

    let mut batches: Vec<Vec<Transaction>> = (0..count).map(|_| Vec::new()).collect();
    for (index, transaction) in transactions.into_iter().enumerate() {
        batches[index % count].push(transaction);
    }
    batches
}
