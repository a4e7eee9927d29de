//! Workflow validation module
//!
//! Rejects malformed workflow specs before a run is ever created. Checks run
//! in four groups, stopping at the first group that produced errors:
//!
//! 1. Structural — name, nodes present, entry node known, node kinds
//! 2. Graph — edge endpoints, acyclicity (DFS with a recursion stack),
//!    reachability from the entry node (BFS)
//! 3. References — agents exist, are published, and support the workflow's
//!    chain and token
//! 4. Budget — positive reservation amount

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use crate::store::{AgentRegistry, RegistryError};
use crate::types::{AgentStatus, NodeKind, WorkflowSpec};

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow has no nodes")]
    NoNodes,

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("entry node '{0}' is not among the workflow nodes")]
    UnknownEntryNode(String),

    #[error("node '{node}' has unsupported kind '{kind:?}'")]
    UnsupportedNodeKind { node: String, kind: NodeKind },

    #[error("node '{0}' is an agent node without an agent reference")]
    MissingAgentRef(String),

    #[error("edge {from} -> {to} references unknown node '{missing}'")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },

    #[error("workflow contains a cycle involving node '{0}'")]
    CycleDetected(String),

    #[error("node '{0}' is unreachable from the entry node")]
    UnreachableNode(String),

    #[error("node '{node}' references unknown agent '{reference}'")]
    UnknownAgent { node: String, reference: String },

    #[error("agent '{reference}' is {status:?}, not published")]
    AgentNotPublished {
        reference: String,
        status: AgentStatus,
    },

    #[error("agent '{reference}' does not support chain '{chain}'")]
    ChainNotSupported { reference: String, chain: String },

    #[error("agent '{reference}' does not support token '{token}'")]
    TokenNotSupported { reference: String, token: String },

    #[error("max_budget must be a positive atomic amount")]
    InvalidBudget,

    #[error("registry lookup failed: {0}")]
    Registry(String),
}

/// Validates workflow specs against graph invariants and the agent registry.
pub struct WorkflowValidator {
    registry: Arc<dyn AgentRegistry>,
}

impl WorkflowValidator {
    pub fn new(registry: Arc<dyn AgentRegistry>) -> Self {
        Self { registry }
    }

    /// Validate a spec. Returns every error found in the first failing
    /// check group.
    pub async fn validate(&self, spec: &WorkflowSpec) -> Result<(), Vec<ValidationError>> {
        let errors = self.check_structural(spec);
        if !errors.is_empty() {
            return Err(errors);
        }

        let errors = self.check_graph(spec);
        if !errors.is_empty() {
            return Err(errors);
        }

        let errors = self.check_references(spec).await;
        if !errors.is_empty() {
            return Err(errors);
        }

        if spec.max_budget == 0 {
            return Err(vec![ValidationError::InvalidBudget]);
        }

        Ok(())
    }

    fn check_structural(&self, spec: &WorkflowSpec) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if spec.name.trim().is_empty() {
            errors.push(ValidationError::EmptyName);
        }
        if spec.nodes.is_empty() {
            errors.push(ValidationError::NoNodes);
            return errors;
        }

        let mut seen = HashSet::new();
        for node in &spec.nodes {
            if !seen.insert(node.id.as_str()) {
                errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
            }
            match node.kind {
                NodeKind::Agent => {
                    if node.agent_ref.as_deref().map_or(true, str::is_empty) {
                        errors.push(ValidationError::MissingAgentRef(node.id.clone()));
                    }
                }
                kind => errors.push(ValidationError::UnsupportedNodeKind {
                    node: node.id.clone(),
                    kind,
                }),
            }
        }

        if !seen.contains(spec.entry_node.as_str()) {
            errors.push(ValidationError::UnknownEntryNode(spec.entry_node.clone()));
        }

        errors
    }

    fn check_graph(&self, spec: &WorkflowSpec) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let node_ids: HashSet<&str> = spec.nodes.iter().map(|n| n.id.as_str()).collect();

        let mut dangling = false;
        for edge in &spec.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !node_ids.contains(endpoint.as_str()) {
                    dangling = true;
                    errors.push(ValidationError::DanglingEdge {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }
        if dangling {
            // Cycle and reachability checks need a well-formed edge set.
            return errors;
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for id in &node_ids {
            adjacency.entry(id).or_default();
        }
        for edge in &spec.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }

        if let Some(cycle_node) = find_cycle(&adjacency) {
            errors.push(ValidationError::CycleDetected(cycle_node.to_string()));
            return errors;
        }

        // BFS from the entry node.
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from([spec.entry_node.as_str()]);
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(next) = adjacency.get(id) {
                queue.extend(next.iter().copied());
            }
        }
        let mut unreachable: Vec<&str> = node_ids.difference(&reachable).copied().collect();
        unreachable.sort_unstable();
        for id in unreachable {
            errors.push(ValidationError::UnreachableNode(id.to_string()));
        }

        errors
    }

    async fn check_references(&self, spec: &WorkflowSpec) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for node in &spec.nodes {
            let Some(reference) = node.agent_ref.as_deref() else {
                continue;
            };
            let agent = match self.registry.get(reference).await {
                Ok(agent) => agent,
                Err(RegistryError::NotFound(_)) => {
                    errors.push(ValidationError::UnknownAgent {
                        node: node.id.clone(),
                        reference: reference.to_string(),
                    });
                    continue;
                }
                Err(other) => {
                    errors.push(ValidationError::Registry(other.to_string()));
                    continue;
                }
            };

            if agent.status != AgentStatus::Published {
                errors.push(ValidationError::AgentNotPublished {
                    reference: reference.to_string(),
                    status: agent.status,
                });
                continue;
            }
            if !agent.supported_chains.contains(&spec.chain) {
                errors.push(ValidationError::ChainNotSupported {
                    reference: reference.to_string(),
                    chain: spec.chain.clone(),
                });
            }
            if !agent.supported_tokens.contains(&spec.token) {
                errors.push(ValidationError::TokenNotSupported {
                    reference: reference.to_string(),
                    token: spec.token.clone(),
                });
            }
        }

        errors
    }
}

/// DFS cycle detection with an explicit recursion stack. Returns a node on
/// the cycle, if any.
fn find_cycle<'a>(adjacency: &HashMap<&'a str, Vec<&'a str>>) -> Option<&'a str> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();

    fn dfs<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> Option<&'a str> {
        visited.insert(node);
        rec_stack.insert(node);

        if let Some(neighbors) = adjacency.get(node) {
            for &neighbor in neighbors {
                if !visited.contains(neighbor) {
                    if let Some(cycle_node) = dfs(neighbor, adjacency, visited, rec_stack) {
                        return Some(cycle_node);
                    }
                } else if rec_stack.contains(neighbor) {
                    return Some(neighbor);
                }
            }
        }

        rec_stack.remove(node);
        None
    }

    let mut nodes: Vec<&str> = adjacency.keys().copied().collect();
    nodes.sort_unstable();
    for node in nodes {
        if !visited.contains(node) {
            if let Some(cycle_node) = dfs(node, adjacency, &mut visited, &mut rec_stack) {
                return Some(cycle_node);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::RwLock;

    use async_trait::async_trait;

    use super::*;
    use crate::store::{AgentFilter, AgentPatch};
    use crate::types::{AgentDescriptor, PricingPolicy, WorkflowEdge, WorkflowNode};

    /// Minimal registry stub: a fixed map of descriptors.
    struct StubRegistry {
        agents: RwLock<HashMap<String, AgentDescriptor>>,
    }

    impl StubRegistry {
        fn with_agents(agents: Vec<AgentDescriptor>) -> Arc<Self> {
            Arc::new(Self {
                agents: RwLock::new(
                    agents
                        .into_iter()
                        .map(|a| (a.reference.clone(), a))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl AgentRegistry for StubRegistry {
        async fn create(
            &self,
            descriptor: AgentDescriptor,
        ) -> Result<AgentDescriptor, RegistryError> {
            self.agents
                .write()
                .unwrap()
                .insert(descriptor.reference.clone(), descriptor.clone());
            Ok(descriptor)
        }

        async fn get(&self, reference: &str) -> Result<AgentDescriptor, RegistryError> {
            self.agents
                .read()
                .unwrap()
                .get(reference)
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(reference.to_string()))
        }

        async fn list(&self, _: &AgentFilter) -> Result<Vec<AgentDescriptor>, RegistryError> {
            Ok(self.agents.read().unwrap().values().cloned().collect())
        }

        async fn update(
            &self,
            reference: &str,
            _: AgentPatch,
        ) -> Result<AgentDescriptor, RegistryError> {
            self.get(reference).await
        }

        async fn publish(&self, reference: &str) -> Result<AgentDescriptor, RegistryError> {
            self.get(reference).await
        }

        async fn deprecate(&self, reference: &str) -> Result<AgentDescriptor, RegistryError> {
            self.get(reference).await
        }

        async fn suspend(&self, reference: &str) -> Result<AgentDescriptor, RegistryError> {
            self.get(reference).await
        }

        async fn delete(&self, _: &str) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    fn published_agent(reference: &str) -> AgentDescriptor {
        let mut agent = AgentDescriptor::draft(
            reference,
            reference,
            "0xowner",
            PricingPolicy::free("base", "USDC"),
        )
        .with_endpoint(format!("https://agents.example/{reference}"))
        .with_chain("base")
        .with_token("USDC");
        agent.status = AgentStatus::Published;
        agent
    }

    fn two_node_spec() -> WorkflowSpec {
        WorkflowSpec::new(
            "wf-1",
            "test flow",
            "base",
            "USDC",
            5,
            vec![
                WorkflowNode::agent("a", "echo"),
                WorkflowNode::agent("b", "upper"),
            ],
            vec![WorkflowEdge::new("a", "b")],
        )
    }

    fn validator_with(agents: Vec<AgentDescriptor>) -> WorkflowValidator {
        WorkflowValidator::new(StubRegistry::with_agents(agents))
    }

    #[tokio::test]
    async fn test_valid_spec_passes() {
        let validator = validator_with(vec![published_agent("echo"), published_agent("upper")]);
        validator.validate(&two_node_spec()).await.unwrap();
    }

    #[tokio::test]
    async fn test_structural_rejections() {
        let validator = validator_with(vec![]);

        let mut spec = two_node_spec();
        spec.name = "  ".to_string();
        spec.nodes.push(WorkflowNode::agent("a", "echo"));
        spec.entry_node = "nope".to_string();
        let errors = validator.validate(&spec).await.unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::EmptyName)));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateNodeId(id) if id == "a")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownEntryNode(id) if id == "nope")));
    }

    #[tokio::test]
    async fn test_non_agent_node_kinds_rejected() {
        let validator = validator_with(vec![published_agent("echo")]);
        let mut spec = two_node_spec();
        spec.nodes[1].kind = NodeKind::Loop;
        let errors = validator.validate(&spec).await.unwrap_err();
        assert!(errors.iter().any(
            |e| matches!(e, ValidationError::UnsupportedNodeKind { node, kind: NodeKind::Loop } if node == "b")
        ));
    }

    #[tokio::test]
    async fn test_dangling_edge_rejected() {
        let validator = validator_with(vec![published_agent("echo"), published_agent("upper")]);
        let mut spec = two_node_spec();
        spec.edges.push(WorkflowEdge::new("b", "ghost"));
        let errors = validator.validate(&spec).await.unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DanglingEdge { missing, .. } if missing == "ghost")));
    }

    #[tokio::test]
    async fn test_cycle_rejected() {
        let validator = validator_with(vec![
            published_agent("echo"),
            published_agent("upper"),
            published_agent("tail"),
        ]);
        let spec = WorkflowSpec::new(
            "wf-cycle",
            "cyclic",
            "base",
            "USDC",
            5,
            vec![
                WorkflowNode::agent("a", "echo"),
                WorkflowNode::agent("b", "upper"),
                WorkflowNode::agent("c", "tail"),
            ],
            vec![
                WorkflowEdge::new("a", "b"),
                WorkflowEdge::new("b", "c"),
                WorkflowEdge::new("c", "a"),
            ],
        );
        let errors = validator.validate(&spec).await.unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::CycleDetected(_))));
    }

    #[tokio::test]
    async fn test_unreachable_node_rejected() {
        let validator = validator_with(vec![published_agent("echo"), published_agent("upper")]);
        let spec = WorkflowSpec::new(
            "wf-island",
            "island",
            "base",
            "USDC",
            5,
            vec![
                WorkflowNode::agent("a", "echo"),
                WorkflowNode::agent("b", "upper"),
            ],
            vec![],
        );
        let errors = validator.validate(&spec).await.unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnreachableNode(id) if id == "b")));
    }

    #[tokio::test]
    async fn test_unknown_and_unpublished_agents_rejected() {
        let mut draft = published_agent("upper");
        draft.status = AgentStatus::Draft;
        let validator = validator_with(vec![draft]);
        let errors = validator.validate(&two_node_spec()).await.unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownAgent { reference, .. } if reference == "echo")));
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::AgentNotPublished { reference, status: AgentStatus::Draft } if reference == "upper"
        )));
    }

    #[tokio::test]
    async fn test_chain_and_token_mismatch_rejected() {
        let mut odd = published_agent("echo");
        odd.supported_chains = ["polygon".to_string()].into();
        odd.supported_tokens = ["DAI".to_string()].into();
        let validator = validator_with(vec![odd, published_agent("upper")]);
        let errors = validator.validate(&two_node_spec()).await.unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::ChainNotSupported { chain, .. } if chain == "base")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::TokenNotSupported { token, .. } if token == "USDC")));
    }

    #[tokio::test]
    async fn test_zero_budget_rejected() {
        let validator = validator_with(vec![published_agent("echo"), published_agent("upper")]);
        let mut spec = two_node_spec();
        spec.max_budget = 0;
        let errors = validator.validate(&spec).await.unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidBudget));
    }
}
