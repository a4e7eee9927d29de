//! Run workers.
//!
//! A worker pool drains the scheduler queue, one tokio task per worker and
//! one run at a time per worker. Nodes inside a run stay serialized; runs
//! across workers execute in parallel.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use cadenza_core::engine::ExecutionEngine;

use crate::scheduler::WorkflowScheduler;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Spawns and supervises run workers.
pub struct RunWorkerPool {
    scheduler: Arc<WorkflowScheduler>,
    engine: Arc<ExecutionEngine>,
    workers: usize,
    poll_interval: Duration,
}

impl RunWorkerPool {
    pub fn new(scheduler: Arc<WorkflowScheduler>, engine: Arc<ExecutionEngine>) -> Self {
        Self {
            scheduler,
            engine,
            workers: 4,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the number of concurrent workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set how often an idle worker polls the queue.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start the workers.
    pub fn spawn(self) -> WorkerPoolHandle {
        let shutdown = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.workers);

        for worker_id in 0..self.workers {
            let scheduler = self.scheduler.clone();
            let engine = self.engine.clone();
            let shutdown = shutdown.clone();
            let poll_interval = self.poll_interval;

            handles.push(tokio::spawn(async move {
                tracing::debug!(worker_id, "run worker started");
                loop {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    match scheduler.next().await {
                        Ok(Some(work)) => {
                            let run_id = work.run.id.clone();
                            tracing::info!(worker_id, run_id = %run_id, "worker picked up run");
                            match engine
                                .execute(&work.spec, &run_id, work.inputs, work.cancel)
                                .await
                            {
                                Ok(run) => {
                                    tracing::info!(
                                        worker_id,
                                        run_id = %run_id,
                                        status = ?run.status,
                                        "run finished"
                                    );
                                }
                                Err(e) => {
                                    tracing::error!(
                                        worker_id,
                                        run_id = %run_id,
                                        error = %e,
                                        "run execution errored"
                                    );
                                }
                            }
                            scheduler.forget(&run_id);
                        }
                        Ok(None) => {
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = sleep(poll_interval) => {}
                            }
                        }
                        Err(e) => {
                            tracing::error!(worker_id, error = %e, "queue pickup failed");
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = sleep(poll_interval) => {}
                            }
                        }
                    }
                }
                tracing::debug!(worker_id, "run worker stopped");
            }));
        }

        WorkerPoolHandle { shutdown, handles }
    }
}

/// Handle to a running worker pool.
pub struct WorkerPoolHandle {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Signal shutdown and wait for every worker to stop. In-flight runs
    /// finish their current node sequence first.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
