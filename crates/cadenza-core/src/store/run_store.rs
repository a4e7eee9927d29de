//! RunStore and RunQueue traits

use async_trait::async_trait;

use super::StoreError;
use crate::types::{NodeRun, Run};

/// Run and node-run persistence.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or overwrite a run.
    async fn save_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Load a run by id.
    async fn load_run(&self, run_id: &str) -> Result<Option<Run>, StoreError>;

    /// List runs, optionally restricted to one workflow.
    async fn list_runs(&self, workflow_id: Option<&str>) -> Result<Vec<Run>, StoreError>;

    /// Insert or overwrite a node run.
    async fn save_node_run(&self, node_run: &NodeRun) -> Result<(), StoreError>;

    /// Node runs belonging to a run, in insertion order.
    async fn node_runs(&self, run_id: &str) -> Result<Vec<NodeRun>, StoreError>;
}

/// Thread-safe FIFO of run ids awaiting worker pickup.
pub trait RunQueue: Send + Sync {
    fn push(&self, run_id: String);

    /// Pop the oldest queued run id, if any.
    fn pop(&self) -> Option<String>;

    /// Remove a specific run id; true when it was queued.
    fn remove(&self, run_id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
