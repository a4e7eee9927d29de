//! RunStore in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;

use cadenza_core::store::{RunStore, StoreError};
use cadenza_core::types::{NodeRun, Run};

const DEFAULT_IN_MEMORY_RUN_LIMIT: usize = 5_000;

/// In-memory run persistence with a hard capacity limit; the oldest run (and
/// its node runs) is evicted when the limit is exceeded.
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, Run>>,
    node_runs: RwLock<HashMap<String, Vec<NodeRun>>>,
    order: RwLock<VecDeque<String>>,
    max_runs: usize,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::with_max_runs(DEFAULT_IN_MEMORY_RUN_LIMIT)
    }

    pub fn with_max_runs(max_runs: usize) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            node_runs: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
            max_runs: max_runs.max(1),
        }
    }

    fn touch_order(order: &mut VecDeque<String>, run_id: &str) {
        order.retain(|id| id != run_id);
        order.push_back(run_id.to_string());
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self
            .runs
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut order = self
            .order
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        if !runs.contains_key(&run.id) && runs.len() >= self.max_runs {
            if let Some(oldest_id) = order.pop_front() {
                runs.remove(&oldest_id);
                let mut node_runs = self
                    .node_runs
                    .write()
                    .map_err(|e| StoreError::Internal(e.to_string()))?;
                node_runs.remove(&oldest_id);
            }
        }
        runs.insert(run.id.clone(), run.clone());
        Self::touch_order(&mut order, &run.id);
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        let runs = self
            .runs
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(runs.get(run_id).cloned())
    }

    async fn list_runs(&self, workflow_id: Option<&str>) -> Result<Vec<Run>, StoreError> {
        let runs = self
            .runs
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut listed: Vec<Run> = runs
            .values()
            .filter(|r| workflow_id.map_or(true, |wf| r.workflow_id == wf))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(listed)
    }

    async fn save_node_run(&self, node_run: &NodeRun) -> Result<(), StoreError> {
        let mut node_runs = self
            .node_runs
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let entries = node_runs.entry(node_run.run_id.clone()).or_default();
        if let Some(existing) = entries.iter_mut().find(|nr| nr.id == node_run.id) {
            *existing = node_run.clone();
        } else {
            entries.push(node_run.clone());
        }
        Ok(())
    }

    async fn node_runs(&self, run_id: &str) -> Result<Vec<NodeRun>, StoreError> {
        let node_runs = self
            .node_runs
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(node_runs.get(run_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> Run {
        Run::queued("wf-1", "user", "0xwallet", "base", "USDC", 5)
    }

    #[test]
    fn test_run_store_round_trip() {
        tokio_test::block_on(async {
            let store = InMemoryRunStore::new();
            let r = run();
            store.save_run(&r).await.unwrap();

            let loaded = store.load_run(&r.id).await.unwrap().unwrap();
            assert_eq!(loaded.id, r.id);
            assert!(store.load_run("missing").await.unwrap().is_none());
        });
    }

    #[test]
    fn test_run_store_evicts_oldest_and_its_node_runs() {
        tokio_test::block_on(async {
            let store = InMemoryRunStore::with_max_runs(2);
            let r1 = run();
            let r2 = run();
            let r3 = run();
            store.save_run(&r1).await.unwrap();
            store
                .save_node_run(&NodeRun::pending(&r1.id, "a"))
                .await
                .unwrap();
            store.save_run(&r2).await.unwrap();
            store.save_run(&r3).await.unwrap();

            assert!(store.load_run(&r1.id).await.unwrap().is_none());
            assert!(store.node_runs(&r1.id).await.unwrap().is_empty());
            assert!(store.load_run(&r2.id).await.unwrap().is_some());
            assert!(store.load_run(&r3.id).await.unwrap().is_some());
        });
    }

    #[test]
    fn test_node_run_updates_replace_by_id() {
        tokio_test::block_on(async {
            let store = InMemoryRunStore::new();
            let r = run();
            store.save_run(&r).await.unwrap();

            let mut nr = NodeRun::pending(&r.id, "a");
            store.save_node_run(&nr).await.unwrap();
            nr.retries = 2;
            store.save_node_run(&nr).await.unwrap();

            let listed = store.node_runs(&r.id).await.unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].retries, 2);
        });
    }

    #[test]
    fn test_list_runs_filters_by_workflow() {
        tokio_test::block_on(async {
            let store = InMemoryRunStore::new();
            let r1 = run();
            let mut r2 = run();
            r2.workflow_id = "wf-2".to_string();
            store.save_run(&r1).await.unwrap();
            store.save_run(&r2).await.unwrap();

            assert_eq!(store.list_runs(Some("wf-1")).await.unwrap().len(), 1);
            assert_eq!(store.list_runs(None).await.unwrap().len(), 2);
        });
    }
}
