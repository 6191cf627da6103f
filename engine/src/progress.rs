//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which decouples the
//! transfer engine from any specific front end. Callbacks are observers
//! only: they never touch persistence.

use crate::model::{Job, Transaction};

/// Trait for receiving progress updates from a run.
///
/// All methods are called synchronously on the orchestrating thread, also
/// when transfers execute on a worker pool. Every method has an empty
/// default so implementors pick what they need.
pub trait ProgressCallback: Send {
    /// Called when a run starts, with the number of pending transactions.
    fn on_run_started(&self, _job: &Job, _pending: usize) {}

    /// Called as each transaction's outcome becomes known.
    fn on_transaction_completed(&self, _transaction: &Transaction) {}

    /// Called after a batch's commands have run.
    fn on_batch_completed(&self, _batch_index: usize, _batch: &[Transaction]) {}

    /// Called when the run finished without error.
    fn on_run_completed(&self, _job: &Job) {}
}
