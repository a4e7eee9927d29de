//! Workflow specification types
//!
//! A workflow is a DAG of agent invocations. The declarative document parser
//! (YAML or otherwise) is external; these types are the structured shape any
//! producer must emit, and what the validator and engine consume.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::AtomicAmount;

/// Node control-flow kind.
///
/// Only `agent` nodes are executable; the other kinds are declared by the
/// document schema for future routing extensions and are rejected at
/// validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Agent,
    Condition,
    Parallel,
    Loop,
}

impl Default for NodeKind {
    fn default() -> Self {
        Self::Agent
    }
}

/// Per-node retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff between attempts, scaled linearly by attempt number
    #[serde(default)]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: 0,
        }
    }
}

/// A single node in the workflow DAG
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique identifier within the workflow
    pub id: String,
    #[serde(default)]
    pub kind: NodeKind,
    /// Registry reference of the agent to invoke (agent nodes)
    #[serde(default)]
    pub agent_ref: Option<String>,
    #[serde(default)]
    pub name: String,
    /// Property name → literal or `{{path}}` template
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl WorkflowNode {
    /// Create an agent node.
    pub fn agent(id: impl Into<String>, agent_ref: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind: NodeKind::Agent,
            agent_ref: Some(agent_ref.into()),
            inputs: Map::new(),
            retry: None,
        }
    }

    /// Add an input mapping entry.
    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    /// Attach a retry policy.
    pub fn with_retry(mut self, max_attempts: u32, backoff_ms: u64) -> Self {
        self.retry = Some(RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff_ms,
        });
        self
    }
}

/// A directed edge carrying data from one node to another
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub from: String,
    pub to: String,
    /// Declared by the document schema; every edge is unconditional today
    #[serde(default)]
    pub condition: Option<String>,
}

impl WorkflowEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }
}

/// Complete workflow specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub owner_id: String,
    /// Chain every node's agent must support
    pub chain: String,
    /// Settlement token every node's agent must support
    pub token: String,
    /// Budget reserved per run, atomic units
    pub max_budget: AtomicAmount,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    pub entry_node: String,
    /// Optional explicit output mapping resolved against the final context;
    /// absent means "output of the last node in topological order"
    #[serde(default)]
    pub output: Option<Value>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl WorkflowSpec {
    /// Create a workflow with the given nodes and edges, entry defaulting to
    /// the first node.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        chain: impl Into<String>,
        token: impl Into<String>,
        max_budget: AtomicAmount,
        nodes: Vec<WorkflowNode>,
        edges: Vec<WorkflowEdge>,
    ) -> Self {
        let entry_node = nodes.first().map(|n| n.id.clone()).unwrap_or_default();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: default_version(),
            owner_id: String::new(),
            chain: chain.into(),
            token: token.into(),
            max_budget,
            nodes,
            edges,
            entry_node,
            output: None,
        }
    }

    /// Override the entry node.
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry_node = entry.into();
        self
    }

    /// Declare an explicit output mapping.
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Look up a node by id.
    pub fn get_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_document_deserializes_with_defaults() {
        let spec: WorkflowSpec = serde_json::from_value(json!({
            "id": "wf-1",
            "name": "echo flow",
            "chain": "base",
            "token": "USDC",
            "max_budget": 5,
            "nodes": [{ "id": "a", "agent_ref": "echo" }],
            "entry_node": "a"
        }))
        .unwrap();

        assert_eq!(spec.version, "1.0");
        assert_eq!(spec.nodes[0].kind, NodeKind::Agent);
        assert!(spec.nodes[0].retry.is_none());
        assert!(spec.edges.is_empty());
        assert!(spec.output.is_none());
    }

    #[test]
    fn test_with_retry_clamps_to_one_attempt() {
        let node = WorkflowNode::agent("a", "echo").with_retry(0, 100);
        assert_eq!(node.retry.unwrap().max_attempts, 1);
    }
}
