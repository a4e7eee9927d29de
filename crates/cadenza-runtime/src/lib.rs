//! # Cadenza Runtime
//!
//! The scheduling layer: `WorkflowScheduler` validates and queues runs with
//! their budget reserved, and `RunWorkerPool` drains the queue, driving the
//! execution engine one run per worker.

mod bootstrap;
mod scheduler;
mod worker;

pub use bootstrap::build_engine;
pub use scheduler::{ScheduledWork, SchedulerError, WorkflowScheduler};
pub use worker::{RunWorkerPool, WorkerPoolHandle};
