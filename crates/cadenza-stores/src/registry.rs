//! AgentRegistry in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use cadenza_core::store::{AgentFilter, AgentPatch, AgentRegistry, RegistryError, StoreError};
use cadenza_core::types::{AgentDescriptor, AgentStatus};

/// In-memory agent directory. Reads vastly outnumber writes, so a
/// readers-writer lock guards the map.
pub struct InMemoryAgentRegistry {
    agents: RwLock<HashMap<String, AgentDescriptor>>,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    fn check_transition(from: AgentStatus, to: AgentStatus) -> Result<(), RegistryError> {
        if !from.can_transition_to(to) {
            return Err(RegistryError::IllegalTransition { from, to });
        }
        Ok(())
    }

    fn check_publishable(agent: &AgentDescriptor) -> Result<(), RegistryError> {
        let problems = agent.publish_problems();
        if problems.is_empty() {
            return Ok(());
        }
        Err(RegistryError::PublishPrecondition {
            reference: agent.reference.clone(),
            reason: problems.join("; "),
        })
    }

    fn transition(
        &self,
        reference: &str,
        to: AgentStatus,
    ) -> Result<AgentDescriptor, RegistryError> {
        let mut agents = self
            .agents
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let agent = agents
            .get_mut(reference)
            .ok_or_else(|| RegistryError::NotFound(reference.to_string()))?;
        Self::check_transition(agent.status, to)?;
        if to == AgentStatus::Published {
            Self::check_publishable(agent)?;
        }
        agent.status = to;
        agent.updated_at = Utc::now();
        Ok(agent.clone())
    }
}

impl Default for InMemoryAgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRegistry for InMemoryAgentRegistry {
    async fn create(&self, descriptor: AgentDescriptor) -> Result<AgentDescriptor, RegistryError> {
        let mut agents = self
            .agents
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        if agents.contains_key(&descriptor.reference) {
            return Err(RegistryError::DuplicateReference(descriptor.reference));
        }
        let mut descriptor = descriptor;
        descriptor.status = AgentStatus::Draft;
        let now = Utc::now();
        descriptor.created_at = now;
        descriptor.updated_at = now;
        agents.insert(descriptor.reference.clone(), descriptor.clone());
        Ok(descriptor)
    }

    async fn get(&self, reference: &str) -> Result<AgentDescriptor, RegistryError> {
        let agents = self
            .agents
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        agents
            .get(reference)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(reference.to_string()))
    }

    async fn list(&self, filter: &AgentFilter) -> Result<Vec<AgentDescriptor>, RegistryError> {
        let agents = self
            .agents
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut matched: Vec<AgentDescriptor> = agents
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.reference.cmp(&b.reference));
        Ok(matched)
    }

    async fn update(
        &self,
        reference: &str,
        patch: AgentPatch,
    ) -> Result<AgentDescriptor, RegistryError> {
        let mut agents = self
            .agents
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let agent = agents
            .get_mut(reference)
            .ok_or_else(|| RegistryError::NotFound(reference.to_string()))?;

        let mut merged = agent.clone();
        if let Some(name) = patch.name {
            merged.name = name;
        }
        if let Some(version) = patch.version {
            merged.version = version;
        }
        if let Some(description) = patch.description {
            merged.description = description;
        }
        if let Some(category) = patch.category {
            merged.category = category;
        }
        if let Some(endpoint) = patch.endpoint {
            merged.endpoint = Some(endpoint);
        }
        if let Some(owner_wallet) = patch.owner_wallet {
            merged.owner_wallet = owner_wallet;
        }
        if let Some(input_schema) = patch.input_schema {
            merged.input_schema = Some(input_schema);
        }
        if let Some(output_schema) = patch.output_schema {
            merged.output_schema = Some(output_schema);
        }
        if let Some(supported_chains) = patch.supported_chains {
            merged.supported_chains = supported_chains;
        }
        if let Some(supported_tokens) = patch.supported_tokens {
            merged.supported_tokens = supported_tokens;
        }
        if let Some(pricing) = patch.pricing {
            merged.pricing = pricing;
        }
        if let Some(tags) = patch.tags {
            merged.tags = tags;
        }
        if let Some(status) = patch.status {
            Self::check_transition(merged.status, status)?;
            merged.status = status;
        }

        // Whatever the patch did, a published agent must still satisfy the
        // publish-time invariants.
        if merged.status == AgentStatus::Published {
            Self::check_publishable(&merged)?;
        }

        merged.updated_at = Utc::now();
        *agent = merged.clone();
        Ok(merged)
    }

    async fn publish(&self, reference: &str) -> Result<AgentDescriptor, RegistryError> {
        self.transition(reference, AgentStatus::Published)
    }

    async fn deprecate(&self, reference: &str) -> Result<AgentDescriptor, RegistryError> {
        self.transition(reference, AgentStatus::Deprecated)
    }

    async fn suspend(&self, reference: &str) -> Result<AgentDescriptor, RegistryError> {
        self.transition(reference, AgentStatus::Suspended)
    }

    async fn delete(&self, reference: &str) -> Result<(), RegistryError> {
        let mut agents = self
            .agents
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let agent = agents
            .get(reference)
            .ok_or_else(|| RegistryError::NotFound(reference.to_string()))?;
        if agent.status != AgentStatus::Draft {
            return Err(RegistryError::DeleteOutsideDraft(reference.to_string()));
        }
        agents.remove(reference);
        Ok(())
    }
}
