//! Run and node-run type definitions
//!
//! A `Run` is one execution of a workflow with its budget bookkeeping and
//! status state machine. A `NodeRun` records one node's execution within it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::AtomicAmount;

/// Log lines kept per node run before older lines are dropped
const MAX_NODE_LOG_LINES: usize = 50;

/// Run status state machine:
/// queued → {running, cancelled}; running → {completed, failed, cancelled};
/// terminal states are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Whether this status is a sink.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check whether a direct transition to `next` is legal.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running) => true,
            (Self::Queued, Self::Cancelled) => true,
            (Self::Running, Self::Completed) => true,
            (Self::Running, Self::Failed) => true,
            (Self::Running, Self::Cancelled) => true,
            _ => false,
        }
    }
}

/// Illegal run state transition
#[derive(Debug, Clone, Error)]
#[error("illegal run state transition: {from:?} -> {to:?}")]
pub struct StateError {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// One execution of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Server-generated, globally unique
    pub id: String,
    pub workflow_id: String,
    pub owner_id: String,
    /// Wallet the budget was reserved from
    pub wallet: String,
    pub status: RunStatus,
    pub chain: String,
    pub token: String,
    /// Budget reserved at schedule time, atomic units
    pub reserved_budget: AtomicAmount,
    /// Total charged so far; never exceeds `reserved_budget`
    #[serde(default)]
    pub spent_budget: AtomicAmount,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, on the queued → running transition
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly once, on the first transition into a terminal status
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Node whose output became the run output
    #[serde(default)]
    pub output_node: Option<String>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Run {
    /// Create a queued run with a fresh id.
    pub fn queued(
        workflow_id: impl Into<String>,
        owner_id: impl Into<String>,
        wallet: impl Into<String>,
        chain: impl Into<String>,
        token: impl Into<String>,
        reserved_budget: AtomicAmount,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            owner_id: owner_id.into(),
            wallet: wallet.into(),
            status: RunStatus::Queued,
            chain: chain.into(),
            token: token.into(),
            reserved_budget,
            spent_budget: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            output_node: None,
            output: None,
            error: None,
        }
    }

    /// Apply a status transition, stamping `started_at`/`ended_at` exactly
    /// once on the appropriate edges.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), StateError> {
        if !self.status.can_transition_to(next) {
            return Err(StateError {
                from: self.status,
                to: next,
            });
        }
        if self.status == RunStatus::Queued && next == RunStatus::Running {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }

    /// Charge `cost` against the reservation. Fails when the reservation
    /// would be exceeded; `spent <= reserved` holds at all times.
    pub fn charge(&mut self, cost: AtomicAmount) -> Result<(), AtomicAmount> {
        let next = self.spent_budget.saturating_add(cost);
        if next > self.reserved_budget {
            return Err(self.reserved_budget - self.spent_budget);
        }
        self.spent_budget = next;
        Ok(())
    }

    /// Budget still unspent out of the reservation.
    pub fn remaining_budget(&self) -> AtomicAmount {
        self.reserved_budget.saturating_sub(self.spent_budget)
    }
}

/// Node-run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

/// Record of one node's execution within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRun {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    #[serde(default)]
    pub agent_ref: String,
    pub status: NodeRunStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Inputs after template resolution
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub output: Option<Value>,
    /// Cost charged for this node, atomic units
    #[serde(default)]
    pub cost: AtomicAmount,
    /// Retries consumed beyond the first attempt
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub error: Option<String>,
    /// On-chain transfer hash when the node was paid for
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl NodeRun {
    /// Create a pending node-run record.
    pub fn pending(run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            node_id: node_id.into(),
            agent_ref: String::new(),
            status: NodeRunStatus::Pending,
            started_at: None,
            ended_at: None,
            inputs: Value::Null,
            output: None,
            cost: 0,
            retries: 0,
            error: None,
            transaction_hash: None,
            logs: Vec::new(),
        }
    }

    /// Append a log line, dropping the oldest beyond the cap.
    pub fn push_log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
        if self.logs.len() > MAX_NODE_LOG_LINES {
            let excess = self.logs.len() - MAX_NODE_LOG_LINES;
            self.logs.drain(..excess);
        }
    }
}
