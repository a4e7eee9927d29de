//! Agent descriptor type definitions
//!
//! An agent descriptor is the registry record for a remote JSON-RPC agent:
//! where it lives, what it accepts and produces, what it costs, and where it
//! is in its publication lifecycle.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AtomicAmount;

/// Closed category set for agent discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentCategory {
    DataCollection,
    Analysis,
    Transformation,
    Summarization,
    Notification,
    Storage,
    MlInference,
    Validation,
    Other,
}

impl Default for AgentCategory {
    fn default() -> Self {
        Self::Other
    }
}

/// Agent publication lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Editable, not callable by workflows
    Draft,
    /// Callable; publish-time invariants hold
    Published,
    /// No longer offered to new workflows
    Deprecated,
    /// Administratively disabled from any prior status
    Suspended,
}

impl AgentStatus {
    /// Check whether a direct transition to `next` is legal.
    ///
    /// The lifecycle graph is draft → published, published → deprecated,
    /// deprecated → published (re-publish), and any status → suspended.
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        if *self == next {
            return false;
        }
        match (self, next) {
            (_, AgentStatus::Suspended) => true,
            (AgentStatus::Draft, AgentStatus::Published) => true,
            (AgentStatus::Deprecated, AgentStatus::Published) => true,
            (AgentStatus::Published, AgentStatus::Deprecated) => true,
            _ => false,
        }
    }
}

/// Pricing model for an agent invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingModel {
    PerCall,
    PerUnit,
    Subscription,
}

impl Default for PricingModel {
    fn default() -> Self {
        Self::PerCall
    }
}

/// What one invocation costs and how it is settled.
///
/// Amounts are atomic base units of `token` (1 USDC = 1_000_000 units for a
/// six-decimal stablecoin). `payment_network` may differ from `chain` so a
/// testnet can settle prices quoted against a mainnet chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    #[serde(default)]
    pub model: PricingModel,
    /// Price per invocation in atomic units
    #[serde(default)]
    pub amount: AtomicAmount,
    pub token: String,
    pub chain: String,
    /// Unit descriptor for per-unit pricing (e.g. "1k tokens")
    #[serde(default)]
    pub unit: Option<String>,
    /// Whether the agent answers 402 until paid
    #[serde(default)]
    pub requires_payment: bool,
    /// Settlement network override
    #[serde(default)]
    pub payment_network: Option<String>,
}

impl PricingPolicy {
    /// Free per-call pricing on the given chain/token pair.
    pub fn free(chain: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            model: PricingModel::PerCall,
            amount: 0,
            token: token.into(),
            chain: chain.into(),
            unit: None,
            requires_payment: false,
            payment_network: None,
        }
    }

    /// The network payments settle on (falls back to the pricing chain).
    pub fn settlement_network(&self) -> &str {
        self.payment_network.as_deref().unwrap_or(&self.chain)
    }
}

/// Registry record describing a callable agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Stable unique reference; immutable across updates
    pub reference: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: AgentCategory,
    /// Base URL of the agent's JSON-RPC service
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Wallet that receives settled payments
    pub owner_wallet: String,
    /// Owning operator id
    #[serde(default)]
    pub owner_id: String,
    /// JSON-Schema subset (type, properties, required, enum)
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    pub status: AgentStatus,
    #[serde(default)]
    pub supported_chains: BTreeSet<String>,
    #[serde(default)]
    pub supported_tokens: BTreeSet<String>,
    pub pricing: PricingPolicy,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentDescriptor {
    /// Create a draft descriptor with the minimum required fields.
    pub fn draft(
        reference: impl Into<String>,
        name: impl Into<String>,
        owner_wallet: impl Into<String>,
        pricing: PricingPolicy,
    ) -> Self {
        let now = Utc::now();
        Self {
            reference: reference.into(),
            name: name.into(),
            version: "0.1.0".to_string(),
            description: String::new(),
            category: AgentCategory::Other,
            endpoint: None,
            owner_wallet: owner_wallet.into(),
            owner_id: String::new(),
            input_schema: None,
            output_schema: None,
            status: AgentStatus::Draft,
            supported_chains: BTreeSet::new(),
            supported_tokens: BTreeSet::new(),
            pricing,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the JSON-RPC endpoint base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the discovery category.
    pub fn with_category(mut self, category: AgentCategory) -> Self {
        self.category = category;
        self
    }

    /// Add a supported chain.
    pub fn with_chain(mut self, chain: impl Into<String>) -> Self {
        self.supported_chains.insert(chain.into());
        self
    }

    /// Add a supported settlement token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.supported_tokens.insert(token.into());
        self
    }

    /// Add a discovery tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Problems that block publication. Empty means publishable.
    pub fn publish_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.endpoint.as_deref().map_or(true, |e| e.trim().is_empty()) {
            problems.push("endpoint URL is required".to_string());
        }
        if self.supported_chains.is_empty() {
            problems.push("supported_chains must not be empty".to_string());
        }
        if self.supported_tokens.is_empty() {
            problems.push("supported_tokens must not be empty".to_string());
        }
        problems
    }

    /// Whether the agent can serve a workflow on this chain/token pair.
    pub fn supports(&self, chain: &str, token: &str) -> bool {
        self.supported_chains.contains(chain) && self.supported_tokens.contains(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_follow_lifecycle_graph() {
        assert!(AgentStatus::Draft.can_transition_to(AgentStatus::Published));
        assert!(AgentStatus::Published.can_transition_to(AgentStatus::Deprecated));
        assert!(AgentStatus::Deprecated.can_transition_to(AgentStatus::Published));
        assert!(AgentStatus::Draft.can_transition_to(AgentStatus::Suspended));
        assert!(AgentStatus::Published.can_transition_to(AgentStatus::Suspended));

        assert!(!AgentStatus::Published.can_transition_to(AgentStatus::Draft));
        assert!(!AgentStatus::Deprecated.can_transition_to(AgentStatus::Draft));
        assert!(!AgentStatus::Suspended.can_transition_to(AgentStatus::Published));
        assert!(!AgentStatus::Draft.can_transition_to(AgentStatus::Draft));
    }

    #[test]
    fn test_publish_problems_require_endpoint_and_support_sets() {
        let agent = AgentDescriptor::draft(
            "echo",
            "Echo",
            "0xowner",
            PricingPolicy::free("base", "USDC"),
        );
        let problems = agent.publish_problems();
        assert_eq!(problems.len(), 3);

        let agent = agent
            .with_endpoint("https://agents.example/echo")
            .with_chain("base")
            .with_token("USDC");
        assert!(agent.publish_problems().is_empty());
    }

    #[test]
    fn test_category_serializes_kebab_case() {
        let json = serde_json::to_string(&AgentCategory::MlInference).unwrap();
        assert_eq!(json, "\"ml-inference\"");
        let json = serde_json::to_string(&AgentCategory::DataCollection).unwrap();
        assert_eq!(json, "\"data-collection\"");
    }
}
