//! AgentRegistry trait and supporting types

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::StoreError;
use crate::types::{AgentCategory, AgentDescriptor, AgentStatus, PricingPolicy};

/// Registry error types
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("agent reference already registered: {0}")]
    DuplicateReference(String),

    #[error("illegal agent status transition: {from:?} -> {to:?}")]
    IllegalTransition { from: AgentStatus, to: AgentStatus },

    #[error("agent '{reference}' cannot be published: {reason}")]
    PublishPrecondition { reference: String, reason: String },

    #[error("agent '{0}' can only be deleted while in draft")]
    DeleteOutsideDraft(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Listing filter; unset fields match everything. Tags match any-of.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub category: Option<AgentCategory>,
    pub status: Option<AgentStatus>,
    pub chain: Option<String>,
    pub token: Option<String>,
    pub owner_id: Option<String>,
    pub tags: Vec<String>,
}

impl AgentFilter {
    pub fn status(status: AgentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Whether `agent` passes every set predicate.
    pub fn matches(&self, agent: &AgentDescriptor) -> bool {
        if let Some(category) = self.category {
            if agent.category != category {
                return false;
            }
        }
        if let Some(status) = self.status {
            if agent.status != status {
                return false;
            }
        }
        if let Some(chain) = &self.chain {
            if !agent.supported_chains.contains(chain) {
                return false;
            }
        }
        if let Some(token) = &self.token {
            if !agent.supported_tokens.contains(token) {
                return false;
            }
        }
        if let Some(owner_id) = &self.owner_id {
            if &agent.owner_id != owner_id {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| agent.tags.contains(t)) {
            return false;
        }
        true
    }
}

/// Partial update for an agent descriptor. The reference is deliberately
/// absent: it is immutable. A `status` patch routed through `update` is
/// subject to the same transition rules as the dedicated operations.
#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub category: Option<AgentCategory>,
    pub endpoint: Option<String>,
    pub owner_wallet: Option<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub supported_chains: Option<BTreeSet<String>>,
    pub supported_tokens: Option<BTreeSet<String>>,
    pub pricing: Option<PricingPolicy>,
    pub tags: Option<Vec<String>>,
    pub status: Option<AgentStatus>,
}

/// Typed directory of callable agents.
///
/// Lifecycle: created in draft, published once the publish-time invariants
/// hold (endpoint set, non-empty chain/token sets), deprecated when retired,
/// suspended from anywhere. Deletion is draft-only.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Insert a new descriptor in draft status.
    async fn create(&self, descriptor: AgentDescriptor) -> Result<AgentDescriptor, RegistryError>;

    /// Fetch by reference.
    async fn get(&self, reference: &str) -> Result<AgentDescriptor, RegistryError>;

    /// List descriptors passing the filter.
    async fn list(&self, filter: &AgentFilter) -> Result<Vec<AgentDescriptor>, RegistryError>;

    /// Merge non-reference fields. Publish-time invariants re-run when the
    /// patch would leave the agent published.
    async fn update(&self, reference: &str, patch: AgentPatch)
        -> Result<AgentDescriptor, RegistryError>;

    /// Transition draft/deprecated → published, enforcing invariants.
    async fn publish(&self, reference: &str) -> Result<AgentDescriptor, RegistryError>;

    /// Transition published → deprecated.
    async fn deprecate(&self, reference: &str) -> Result<AgentDescriptor, RegistryError>;

    /// Transition any status → suspended.
    async fn suspend(&self, reference: &str) -> Result<AgentDescriptor, RegistryError>;

    /// Remove a draft descriptor.
    async fn delete(&self, reference: &str) -> Result<(), RegistryError>;
}
