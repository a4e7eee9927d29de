//! Workflow scheduler.
//!
//! Accepts validated workflows, reserves the run budget, and queues runs for
//! worker pickup. Owns the run status state machine from the outside:
//! cancellation flips the stored status (and fires the run's cancellation
//! token) and the engine observes it at the next node boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use cadenza_core::store::{BudgetLedger, LedgerError, RunQueue, RunStore, StoreError};
use cadenza_core::types::{Run, RunStatus, StateError, WorkflowSpec};
use cadenza_core::validator::{ValidationError, WorkflowValidator};

/// Scheduler error types
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("workflow validation failed: {}", .reasons.join("; "))]
    Validation { reasons: Vec<String> },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl SchedulerError {
    fn validation(errors: Vec<ValidationError>) -> Self {
        Self::Validation {
            reasons: errors.iter().map(ToString::to_string).collect(),
        }
    }
}

/// A run handed to a worker: everything the engine needs to execute it.
pub struct ScheduledWork {
    pub run: Run,
    pub spec: WorkflowSpec,
    pub inputs: Value,
    pub cancel: CancellationToken,
}

struct PendingWork {
    spec: WorkflowSpec,
    inputs: Value,
}

/// Creates, queues, and cancels runs.
pub struct WorkflowScheduler {
    validator: WorkflowValidator,
    ledger: Arc<dyn BudgetLedger>,
    run_store: Arc<dyn RunStore>,
    queue: Arc<dyn RunQueue>,
    /// spec + inputs for queued runs awaiting pickup
    pending: Mutex<HashMap<String, PendingWork>>,
    /// cancellation tokens for runs handed to workers
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl WorkflowScheduler {
    pub fn new(
        validator: WorkflowValidator,
        ledger: Arc<dyn BudgetLedger>,
        run_store: Arc<dyn RunStore>,
        queue: Arc<dyn RunQueue>,
    ) -> Self {
        Self {
            validator,
            ledger,
            run_store,
            queue,
            pending: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Validate the workflow, reserve its budget from `wallet`, and enqueue
    /// a run. The run is never created when validation or the reservation
    /// fails.
    pub async fn schedule(
        &self,
        spec: &WorkflowSpec,
        wallet: &str,
        inputs: Value,
    ) -> Result<Run, SchedulerError> {
        if let Err(errors) = self.validator.validate(spec).await {
            return Err(SchedulerError::validation(errors));
        }

        let run = Run::queued(
            &spec.id,
            &spec.owner_id,
            wallet,
            &spec.chain,
            &spec.token,
            spec.max_budget,
        );
        self.ledger
            .reserve(&run.id, wallet, spec.max_budget, &spec.token, &spec.chain)
            .await?;
        self.run_store.save_run(&run).await?;

        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(
                run.id.clone(),
                PendingWork {
                    spec: spec.clone(),
                    inputs,
                },
            );
        }
        self.queue.push(run.id.clone());

        tracing::info!(
            run_id = %run.id,
            workflow_id = %spec.id,
            wallet = %wallet,
            reserved = spec.max_budget,
            "run scheduled"
        );
        Ok(run)
    }

    /// Hand the oldest queued run to a worker, if any.
    pub async fn next(&self) -> Result<Option<ScheduledWork>, SchedulerError> {
        let Some(run_id) = self.queue.pop() else {
            return Ok(None);
        };
        let Some(work) = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&run_id)
        else {
            // Cancelled between pop and pickup.
            return Ok(None);
        };
        let run = self
            .run_store
            .load_run(&run_id)
            .await?
            .ok_or_else(|| SchedulerError::RunNotFound(run_id.clone()))?;

        let cancel = CancellationToken::new();
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run_id, cancel.clone());

        Ok(Some(ScheduledWork {
            run,
            spec: work.spec,
            inputs: work.inputs,
            cancel,
        }))
    }

    /// Look up a run.
    pub async fn status(&self, run_id: &str) -> Result<Run, SchedulerError> {
        self.run_store
            .load_run(run_id)
            .await?
            .ok_or_else(|| SchedulerError::RunNotFound(run_id.to_string()))
    }

    /// Apply a status transition with state-machine checks.
    pub async fn update_status(
        &self,
        run_id: &str,
        status: RunStatus,
    ) -> Result<Run, SchedulerError> {
        let mut run = self.status(run_id).await?;
        run.transition(status)?;
        self.run_store.save_run(&run).await?;
        Ok(run)
    }

    /// Cancel a queued or running run.
    ///
    /// Queued runs leave the queue and their full reservation is released
    /// here. Running runs are cancelled best-effort: the stored status flips,
    /// the worker's token fires, and the engine releases the reservation
    /// when it observes the terminal status at the next node boundary.
    pub async fn cancel(&self, run_id: &str) -> Result<Run, SchedulerError> {
        let mut run = self.status(run_id).await?;
        let was_queued = run.status == RunStatus::Queued;
        run.transition(RunStatus::Cancelled)?;

        self.run_store.save_run(&run).await?;
        // A worker may have picked the run up between the status read and
        // the save; firing the token covers both sides of that race.
        if let Some(token) = self
            .tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(run_id)
        {
            token.cancel();
        }
        if was_queued {
            self.queue.remove(run_id);
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(run_id);
            self.ledger.release(run_id, 0).await?;
        }

        tracing::info!(run_id = %run_id, was_queued, "run cancelled");
        Ok(run)
    }

    /// Drop the cancellation token of a finished run.
    pub fn forget(&self, run_id: &str) {
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(run_id);
    }

    /// Queued runs awaiting pickup.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }
}
